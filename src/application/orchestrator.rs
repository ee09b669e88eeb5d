use super::flow::{FlowAction, FlowStep, PaymentFlow};
use super::gate::FlowGate;
use super::poller::SessionPoller;
use super::serial::SerialBackend;
use super::supervisor::{ReaderSupervisor, SupervisorMsg};
use super::token_cache::ConnectionTokenCache;
use crate::config::Settings;
use crate::domain::device::DeviceIdentity;
use crate::domain::events::{SessionEvent, SessionEventStatus, TerminalEvent};
use crate::domain::ports::{BackendBox, EventSinkRef, ReaderSdkRef, TokenProviderRef};
use crate::domain::reader::{DiscoveryConfig, ReaderConnectionState};
use crate::domain::session::{FlowState, PaymentSession, SessionUpdate};
use crate::error::{OrchestratorError, Result, SdkError};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reason reported for a flow aborted by `stop`.
pub const ORCHESTRATOR_STOPPED: &str = "orchestrator-stopped";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub location_retry: Duration,
    pub discovery: DiscoveryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4),
            location_retry: Duration::from_secs(15),
            discovery: DiscoveryConfig { simulated: true },
        }
    }
}

impl From<&Settings> for OrchestratorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            location_retry: settings.location_retry(),
            discovery: DiscoveryConfig {
                simulated: settings.reader.simulated,
            },
        }
    }
}

/// Messages processed by the orchestrator actor, in arrival order.
#[derive(Debug)]
pub enum Command {
    Start,
    Stop,
    StopIfIdle,
    Shutdown(oneshot::Sender<()>),
    AbortActiveFlow { reason: String },
    SessionClaimed(PaymentSession),
    Flow {
        flow_id: u64,
        step: std::result::Result<FlowStep, SdkError>,
    },
    Supervisor(SupervisorMsg),
    Snapshot(oneshot::Sender<Snapshot>),
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub running: bool,
    pub reader_state: ReaderConnectionState,
    pub flow_state: Option<FlowState>,
    pub active_session_id: Option<String>,
    pub busy: bool,
    pub location_known: bool,
}

/// Composition root of the orchestrator.
///
/// Created in two steps because the reader SDK needs the token provider
/// before the orchestrator can own the SDK:
///
/// ```ignore
/// let orchestrator = Orchestrator::new(device, backend, config);
/// let sdk = Arc::new(SimulatedReader::new(orchestrator.token_provider(), &sim));
/// let handle = orchestrator.spawn(sdk, sink);
/// handle.start()?;
/// ```
pub struct Orchestrator {
    device: DeviceIdentity,
    backend: SerialBackend,
    tokens: Arc<ConnectionTokenCache>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Wraps `backend` in the serial worker. Must be called inside a Tokio runtime.
    pub fn new(device: DeviceIdentity, backend: BackendBox, config: OrchestratorConfig) -> Self {
        let backend = SerialBackend::spawn(backend);
        let tokens = Arc::new(ConnectionTokenCache::new(
            device.clone(),
            Arc::new(backend.clone()),
        ));
        Self {
            device,
            backend,
            tokens,
            config,
        }
    }

    pub fn token_provider(&self) -> TokenProviderRef {
        self.tokens.clone()
    }

    /// Starts the actor task. The orchestrator stays idle until `start`.
    pub fn spawn(self, sdk: ReaderSdkRef, sink: EventSinkRef) -> OrchestratorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = ReaderSupervisor::new(
            sdk.clone(),
            self.tokens.clone(),
            sink.clone(),
            tx.clone(),
            self.config.discovery.clone(),
            self.config.location_retry,
        );
        let actor = OrchestratorActor {
            device: self.device,
            backend: self.backend,
            tokens: self.tokens,
            sdk,
            sink,
            gate: FlowGate::new(),
            poll_interval: self.config.poll_interval,
            mailbox: tx.clone(),
            supervisor,
            flow: None,
            next_flow_id: 0,
            poller: None,
            running: false,
        };
        tokio::spawn(actor.run(rx));
        OrchestratorHandle { commands: tx }
    }
}

/// Cloneable handle used by the host to drive the orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Stops unless a payment is in progress. A claim in flight counts as
    /// in progress.
    pub fn stop_if_idle(&self) -> Result<()> {
        self.send(Command::StopIfIdle)
    }

    /// Aborts the active payment flow, reporting it as failed with `reason`.
    /// Does nothing when no flow is active.
    pub fn abort_active_flow(&self, reason: impl Into<String>) -> Result<()> {
        self.send(Command::AbortActiveFlow {
            reason: reason.into(),
        })
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| OrchestratorError::Stopped)
    }

    /// Stops everything and waits for the actor to exit.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| OrchestratorError::Stopped)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| OrchestratorError::Stopped)
    }
}

struct OrchestratorActor {
    device: DeviceIdentity,
    backend: SerialBackend,
    tokens: Arc<ConnectionTokenCache>,
    sdk: ReaderSdkRef,
    sink: EventSinkRef,
    gate: FlowGate,
    poll_interval: Duration,
    mailbox: mpsc::UnboundedSender<Command>,
    supervisor: ReaderSupervisor,
    flow: Option<PaymentFlow>,
    next_flow_id: u64,
    poller: Option<CancellationToken>,
    running: bool,
}

impl OrchestratorActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            if let Command::Shutdown(ack) = command {
                self.stop();
                let _ = ack.send(());
                break;
            }
            self.handle(command);
        }
        debug!("orchestrator actor exited");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop | Command::Shutdown(_) => self.stop(),
            Command::StopIfIdle => self.stop_if_idle(),
            Command::AbortActiveFlow { reason } => self.abort_flow(&reason),
            Command::SessionClaimed(session) => self.on_session_claimed(session),
            Command::Flow { flow_id, step } => self.on_flow_step(flow_id, step),
            Command::Supervisor(msg) => self.supervisor.handle(msg),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn start(&mut self) {
        if self.running {
            debug!("orchestrator already running");
            return;
        }
        info!(device_id = %self.device, "orchestrator starting");
        self.running = true;
        self.supervisor.start();

        let cancel = CancellationToken::new();
        SessionPoller::new(
            Arc::new(self.backend.clone()),
            self.device.clone(),
            self.gate.clone(),
            self.poll_interval,
            self.mailbox.clone(),
        )
        .spawn(cancel.clone());
        self.poller = Some(cancel);
    }

    fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        self.abort_flow(ORCHESTRATOR_STOPPED);
        if self.running {
            info!("orchestrator stopping");
        }
        self.running = false;
        self.supervisor.stop();
    }

    fn stop_if_idle(&mut self) {
        if self.flow.is_some() || self.gate.is_busy() {
            info!("stop skipped, payment in progress");
            return;
        }
        self.stop();
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            running: self.running,
            reader_state: self.supervisor.state(),
            flow_state: self.flow.as_ref().map(PaymentFlow::state),
            active_session_id: self.flow.as_ref().map(|f| f.session().id.clone()),
            busy: self.gate.is_busy(),
            location_known: self.tokens.location_id().is_some(),
        }
    }

    fn on_session_claimed(&mut self, session: PaymentSession) {
        if !self.running {
            warn!(session_id = %session.id, "session claimed after stop, reporting failure");
            self.report_failure(&session.id, ORCHESTRATOR_STOPPED);
            self.gate.release();
            return;
        }
        if let Some(active) = &self.flow {
            // Only reachable if the gate was bypassed.
            error!(
                session_id = %session.id,
                active_session_id = %active.session().id,
                "session claimed while another flow is active"
            );
            self.report_failure(&session.id, "device busy");
            return;
        }
        self.supervisor.ensure_connected();

        self.next_flow_id += 1;
        let mut flow = PaymentFlow::claim(self.next_flow_id, session);
        let session_id = flow.session().id.clone();
        info!(session_id = %session_id, flow_id = flow.id(), "payment flow claimed");
        self.emit_session(
            SessionEvent::new(&session_id, SessionEventStatus::Claimed)
                .with_amount(flow.session().amount, flow.session().currency.clone()),
        );

        let Some(client_secret) = flow.session().client_secret().map(str::to_owned) else {
            error!(session_id = %session_id, "missing client secret in session");
            self.flow = Some(flow);
            self.finish_failure("missing client secret");
            return;
        };

        self.backend
            .submit_update(&session_id, SessionUpdate::processing(self.device.as_str()));
        self.emit_session(SessionEvent::new(&session_id, SessionEventStatus::Processing));
        if let Err(e) = flow.mark_processing() {
            error!(error = %e, "flow rejected processing notification");
        }

        let sdk = self.sdk.clone();
        self.spawn_step(flow.id(), async move {
            sdk.retrieve_payment_intent(&client_secret)
                .await
                .map(FlowStep::Retrieved)
        });
        self.flow = Some(flow);
    }

    fn on_flow_step(&mut self, flow_id: u64, step: std::result::Result<FlowStep, SdkError>) {
        let Some(flow) = self.flow.as_mut().filter(|flow| flow.id() == flow_id) else {
            debug!(flow_id, "dropping step of a finished flow");
            return;
        };
        let step = match step {
            Ok(step) => step,
            Err(e) => {
                warn!(session_id = %flow.session().id, state = %flow.state(), error = %e, "payment flow failed");
                self.finish_failure(&e.to_string());
                return;
            }
        };
        match flow.advance(step) {
            Ok(FlowAction::Collect(intent)) => {
                debug!(intent_id = %intent.id, "collecting payment method");
                let sdk = self.sdk.clone();
                let cancel = flow.operation_token();
                self.spawn_step(flow_id, async move {
                    sdk.collect_payment_method(intent, cancel)
                        .await
                        .map(FlowStep::Collected)
                });
            }
            Ok(FlowAction::Confirm(intent)) => {
                debug!(intent_id = %intent.id, "confirming payment intent");
                let sdk = self.sdk.clone();
                let cancel = flow.operation_token();
                self.spawn_step(flow_id, async move {
                    sdk.confirm_payment_intent(intent, cancel)
                        .await
                        .map(FlowStep::Confirmed)
                });
            }
            Ok(FlowAction::Succeed { intent_id }) => self.finish_success(&intent_id),
            Err(e) => warn!(error = %e, "ignoring out-of-order flow step"),
        }
    }

    fn abort_flow(&mut self, reason: &str) {
        let Some(flow) = &self.flow else {
            debug!(reason, "abort requested without an active flow");
            return;
        };
        info!(session_id = %flow.session().id, state = %flow.state(), reason, "aborting payment flow");
        flow.cancel_operation();
        self.finish_failure(reason);
    }

    fn finish_success(&mut self, intent_id: &str) {
        let Some(flow) = self.flow.take() else {
            return;
        };
        let session_id = &flow.session().id;
        info!(session_id = %session_id, intent_id, "payment succeeded");
        self.backend.submit_update(
            session_id,
            SessionUpdate::succeeded(self.device.as_str(), intent_id),
        );
        self.emit_session(
            SessionEvent::new(session_id, SessionEventStatus::Succeeded).with_intent(intent_id),
        );
        self.gate.release();
    }

    fn finish_failure(&mut self, message: &str) {
        let Some(mut flow) = self.flow.take() else {
            return;
        };
        if let Err(e) = flow.fail() {
            warn!(error = %e, "flow already terminal");
        }
        info!(session_id = %flow.session().id, message, "payment failed");
        self.report_failure(&flow.session().id, message);
        self.gate.release();
    }

    fn report_failure(&self, session_id: &str, message: &str) {
        self.backend
            .submit_update(session_id, SessionUpdate::failed(self.device.as_str(), message));
        self.emit_session(
            SessionEvent::new(session_id, SessionEventStatus::Failed).with_message(message),
        );
    }

    fn spawn_step<F>(&self, flow_id: u64, step: F)
    where
        F: Future<Output = std::result::Result<FlowStep, SdkError>> + Send + 'static,
    {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let step = step.await;
            let _ = mailbox.send(Command::Flow { flow_id, step });
        });
    }

    fn emit_session(&self, event: SessionEvent) {
        self.sink.emit(TerminalEvent::Session(event));
    }
}
