#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use terminal_orchestrator::application::orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorHandle,
};
use terminal_orchestrator::domain::device::DeviceIdentity;
use terminal_orchestrator::domain::events::{SessionEvent, SessionEventStatus, TerminalEvent};
use terminal_orchestrator::domain::ports::{CoordinationBackend, ReaderSdk};
use terminal_orchestrator::domain::reader::{
    ConnectionConfig, DiscoveryConfig, Reader, ReaderConnectionState, ReaderEvent,
};
use terminal_orchestrator::domain::session::{
    FlowState, NewSession, PaymentIntent, PaymentIntentStatus, PaymentSession, PendingSession,
    SessionUpdate,
};
use terminal_orchestrator::domain::token::ConnectionToken;
use terminal_orchestrator::error::{BackendError, SdkError};
use terminal_orchestrator::infrastructure::in_memory::ChannelEventSink;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

pub const DEVICE: &str = "tap2pay-test-device";
pub const POLL_INTERVAL: Duration = Duration::from_secs(4);
pub const LOCATION_RETRY: Duration = Duration::from_secs(15);

#[derive(Default)]
struct BackendState {
    location_id: Option<String>,
    pending: VecDeque<PaymentSession>,
    updates: Vec<(String, SessionUpdate)>,
    token_requests: usize,
    claim_requests: usize,
}

/// Coordination backend double. Clones share state, so a test keeps one
/// clone while the orchestrator owns another.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    state: Arc<Mutex<BackendState>>,
}

impl RecordingBackend {
    pub fn with_location(location_id: &str) -> Self {
        let backend = Self::default();
        backend.set_location(Some(location_id));
        backend
    }

    pub fn without_location() -> Self {
        Self::default()
    }

    pub fn set_location(&self, location_id: Option<&str>) {
        self.state.lock().unwrap().location_id = location_id.map(str::to_owned);
    }

    pub fn queue_session(&self, session: PaymentSession) {
        self.state.lock().unwrap().pending.push_back(session);
    }

    pub fn updates(&self) -> Vec<(String, SessionUpdate)> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn token_requests(&self) -> usize {
        self.state.lock().unwrap().token_requests
    }

    pub fn claim_requests(&self) -> usize {
        self.state.lock().unwrap().claim_requests
    }
}

#[async_trait]
impl CoordinationBackend for RecordingBackend {
    async fn issue_connection_token(
        &self,
        _device: &DeviceIdentity,
    ) -> Result<ConnectionToken, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.token_requests += 1;
        Ok(ConnectionToken {
            secret: format!("pst_{}", state.token_requests),
            location_id: state.location_id.clone(),
        })
    }

    async fn claim_next_session(
        &self,
        _device: &DeviceIdentity,
    ) -> Result<Option<PaymentSession>, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.claim_requests += 1;
        Ok(state.pending.pop_front())
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), BackendError> {
        self.state
            .lock()
            .unwrap()
            .updates
            .push((session_id.to_owned(), update.clone()));
        Ok(())
    }

    async fn create_session(&self, request: &NewSession) -> Result<PendingSession, BackendError> {
        Ok(PendingSession {
            id: format!("ps_{}", request.booking_id),
            status: Some("pending".into()),
            amount: request.amount_cents,
            currency: request.currency.clone(),
            target_device_id: request.target_device_id.clone(),
        })
    }
}

#[derive(Default)]
struct ReaderScript {
    connected: Option<Reader>,
    listener: Option<mpsc::UnboundedSender<ReaderEvent>>,
    collect_error: Option<String>,
    connect_failures: usize,
    auto_tap: bool,
    hidden: bool,
}

/// Reader SDK double whose card tap is released by the test.
#[derive(Default)]
pub struct ScriptedReader {
    script: Mutex<ReaderScript>,
    tap: Notify,
    discoveries: AtomicUsize,
    connects: AtomicUsize,
    collect_cancellations: AtomicUsize,
}

impl ScriptedReader {
    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A reader that is already connected when the orchestrator starts.
    pub fn connected() -> Arc<Self> {
        let reader = Self::default();
        reader.script.lock().unwrap().connected = Some(Reader::new("SCRIPTED-1"));
        Arc::new(reader)
    }

    /// Collection succeeds as soon as it is requested.
    pub fn auto_tap(self: Arc<Self>) -> Arc<Self> {
        self.script.lock().unwrap().auto_tap = true;
        self
    }

    pub fn fail_collect(&self, message: &str) {
        self.script.lock().unwrap().collect_error = Some(message.to_owned());
    }

    /// Discovery completes without finding any reader.
    pub fn hide_readers(&self) {
        self.script.lock().unwrap().hidden = true;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.script.lock().unwrap().connect_failures = count;
    }

    /// Presents a card to a pending collection.
    pub fn tap(&self) {
        self.tap.notify_one();
    }

    /// Drops the connection and notifies the connection listener.
    pub fn disconnect(&self, reason: &str) {
        let mut script = self.script.lock().unwrap();
        script.connected = None;
        if let Some(listener) = &script.listener {
            let _ = listener.send(ReaderEvent::Disconnected {
                reason: reason.to_owned(),
            });
        }
    }

    pub fn send_event(&self, event: ReaderEvent) {
        if let Some(listener) = &self.script.lock().unwrap().listener {
            let _ = listener.send(event);
        }
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn collect_cancellations(&self) -> usize {
        self.collect_cancellations.load(Ordering::SeqCst)
    }

    fn require_connected(&self) -> Result<(), SdkError> {
        match self.script.lock().unwrap().connected {
            Some(_) => Ok(()),
            None => Err(SdkError::NotConnected),
        }
    }
}

#[async_trait]
impl ReaderSdk for ScriptedReader {
    fn connected_reader(&self) -> Option<Reader> {
        self.script.lock().unwrap().connected.clone()
    }

    async fn discover_readers(
        &self,
        _config: DiscoveryConfig,
        updates: mpsc::UnboundedSender<Vec<Reader>>,
        _cancel: CancellationToken,
    ) -> Result<(), SdkError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        if self.script.lock().unwrap().hidden {
            return Ok(());
        }
        let _ = updates.send(vec![Reader::new("SCRIPTED-1"), Reader::new("SCRIPTED-2")]);
        Ok(())
    }

    async fn connect_reader(
        &self,
        reader: Reader,
        _config: ConnectionConfig,
        listener: mpsc::UnboundedSender<ReaderEvent>,
    ) -> Result<Reader, SdkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(SdkError::failed("connect refused"));
        }
        script.connected = Some(reader.clone());
        script.listener = Some(listener);
        Ok(reader)
    }

    async fn retrieve_payment_intent(
        &self,
        client_secret: &str,
    ) -> Result<PaymentIntent, SdkError> {
        self.require_connected()?;
        let id = client_secret
            .split_once("_secret_")
            .map(|(id, _)| id.to_owned())
            .ok_or_else(|| SdkError::failed("invalid client secret"))?;
        Ok(PaymentIntent {
            id,
            status: PaymentIntentStatus::RequiresPaymentMethod,
        })
    }

    async fn collect_payment_method(
        &self,
        intent: PaymentIntent,
        cancel: CancellationToken,
    ) -> Result<PaymentIntent, SdkError> {
        self.require_connected()?;
        let (error, auto_tap) = {
            let script = self.script.lock().unwrap();
            (script.collect_error.clone(), script.auto_tap)
        };
        if let Some(message) = error {
            return Err(SdkError::failed(message));
        }
        if !auto_tap {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.collect_cancellations.fetch_add(1, Ordering::SeqCst);
                    return Err(SdkError::Canceled);
                }
                _ = self.tap.notified() => {}
            }
        }
        Ok(PaymentIntent {
            status: PaymentIntentStatus::RequiresConfirmation,
            ..intent
        })
    }

    async fn confirm_payment_intent(
        &self,
        intent: PaymentIntent,
        _cancel: CancellationToken,
    ) -> Result<PaymentIntent, SdkError> {
        self.require_connected()?;
        Ok(PaymentIntent {
            status: PaymentIntentStatus::Succeeded,
            ..intent
        })
    }
}

pub struct Harness {
    pub handle: OrchestratorHandle,
    pub backend: RecordingBackend,
    pub reader: Arc<ScriptedReader>,
    pub events: mpsc::UnboundedReceiver<TerminalEvent>,
}

impl Harness {
    /// Spawns an orchestrator over the given doubles. Not started yet.
    pub fn spawn(backend: RecordingBackend, reader: Arc<ScriptedReader>) -> Self {
        let config = OrchestratorConfig {
            poll_interval: POLL_INTERVAL,
            location_retry: LOCATION_RETRY,
            discovery: DiscoveryConfig { simulated: true },
        };
        let orchestrator = Orchestrator::new(
            DeviceIdentity::derive(Some(DEVICE)),
            Box::new(backend.clone()),
            config,
        );
        let (sink, events) = ChannelEventSink::channel();
        let handle = orchestrator.spawn(reader.clone(), Arc::new(sink));
        Self {
            handle,
            backend,
            reader,
            events,
        }
    }

    /// Waits for the next session event with `status`, skipping everything else.
    pub async fn session_event(&mut self, status: SessionEventStatus) -> SessionEvent {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(TerminalEvent::Session(event)) if event.status == status => {
                        return event;
                    }
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(120), wait)
            .await
            .unwrap_or_else(|_| panic!("no {status:?} session event"))
    }

    /// Waits for a reader-status event with `state`; returns its message.
    pub async fn reader_status(&mut self, state: ReaderConnectionState) -> Option<String> {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Some(TerminalEvent::ReaderStatus(event)) if event.state == state => {
                        return event.message;
                    }
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(120), wait)
            .await
            .unwrap_or_else(|_| panic!("no {state} reader status"))
    }

    /// Drains already emitted events.
    pub fn drain(&mut self) -> Vec<TerminalEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Polls the snapshot until the active flow is in `state`.
    pub async fn wait_for_flow_state(&self, state: FlowState) {
        for _ in 0..1_000 {
            let snapshot = self.handle.snapshot().await.unwrap();
            if snapshot.flow_state == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("flow never reached {state}");
    }
}

pub fn session(id: &str) -> PaymentSession {
    PaymentSession {
        id: id.to_owned(),
        client_secret: Some(format!("pi_{id}_secret_abc")),
        amount: Some(1250),
        currency: Some("EUR".to_owned()),
        metadata: None,
    }
}

/// Lets spawned tasks and the serial backend worker run to completion.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}
