use super::orchestrator::Command;
use super::token_cache::ConnectionTokenCache;
use crate::domain::events::{ReaderStatusEvent, TerminalEvent};
use crate::domain::ports::{EventSinkRef, ReaderSdkRef};
use crate::domain::reader::{
    ConnectionConfig, DiscoveryConfig, Reader, ReaderConnectionState, ReaderEvent,
};
use crate::error::{SdkError, TokenError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Results of the supervisor's background work, delivered back to the actor.
#[derive(Debug)]
pub enum SupervisorMsg {
    /// Re-run the connection check (retry timer fired).
    Check,
    TokenPrimed(Result<(), TokenError>),
    ReadersDiscovered {
        attempt: u64,
        readers: Vec<Reader>,
    },
    DiscoveryFinished {
        attempt: u64,
        result: Result<(), SdkError>,
    },
    ConnectFinished {
        attempt: u64,
        result: Result<Reader, SdkError>,
    },
    Reader(ReaderEvent),
}

/// Keeps exactly one reader discovered and connected while the orchestrator runs.
///
/// Owned by the orchestrator actor; all methods run on the actor task. SDK
/// work is spawned and reports back through the actor's mailbox, tagged with
/// the attempt it belongs to so results of abandoned attempts are dropped.
pub struct ReaderSupervisor {
    sdk: ReaderSdkRef,
    tokens: Arc<ConnectionTokenCache>,
    sink: EventSinkRef,
    mailbox: mpsc::UnboundedSender<Command>,
    listener: mpsc::UnboundedSender<ReaderEvent>,
    discovery: DiscoveryConfig,
    location_retry: Duration,
    state: ReaderConnectionState,
    message: Option<String>,
    active: bool,
    attempt: u64,
    discovery_cancel: Option<CancellationToken>,
    retry: Option<CancellationToken>,
    priming: bool,
}

impl ReaderSupervisor {
    pub fn new(
        sdk: ReaderSdkRef,
        tokens: Arc<ConnectionTokenCache>,
        sink: EventSinkRef,
        mailbox: mpsc::UnboundedSender<Command>,
        discovery: DiscoveryConfig,
        location_retry: Duration,
    ) -> Self {
        let listener = spawn_listener_forwarder(mailbox.clone());
        Self {
            sdk,
            tokens,
            sink,
            mailbox,
            listener,
            discovery,
            location_retry,
            state: ReaderConnectionState::Idle,
            message: None,
            active: false,
            attempt: 0,
            discovery_cancel: None,
            retry: None,
            priming: false,
        }
    }

    pub fn state(&self) -> ReaderConnectionState {
        self.state
    }

    pub fn start(&mut self) {
        self.active = true;
        self.ensure_connected();
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.attempt += 1;
        self.cancel_discovery();
        if let Some(retry) = self.retry.take() {
            retry.cancel();
        }
        self.transition(ReaderConnectionState::Idle, None);
    }

    /// Starts discovery unless a reader is connected, an attempt is already
    /// running, or the reader location is still unknown (in which case a token
    /// is primed first).
    pub fn ensure_connected(&mut self) {
        if !self.active {
            return;
        }
        if let Some(reader) = self.sdk.connected_reader() {
            if self.state != ReaderConnectionState::Connected {
                self.transition(
                    ReaderConnectionState::Connected,
                    Some(reader.display_name().to_owned()),
                );
            }
            return;
        }
        if self.state.is_attempting() {
            return;
        }
        if self.tokens.location_id().is_none() {
            self.prime_token();
            self.transition(
                ReaderConnectionState::Idle,
                Some("waiting for reader location".to_owned()),
            );
            return;
        }
        self.start_discovery();
    }

    pub fn handle(&mut self, msg: SupervisorMsg) {
        match msg {
            SupervisorMsg::Check => {
                self.retry = None;
                self.ensure_connected();
            }
            SupervisorMsg::TokenPrimed(result) => self.on_token_primed(result),
            SupervisorMsg::ReadersDiscovered { attempt, readers } => {
                self.on_readers_discovered(attempt, readers)
            }
            SupervisorMsg::DiscoveryFinished { attempt, result } => {
                self.on_discovery_finished(attempt, result)
            }
            SupervisorMsg::ConnectFinished { attempt, result } => {
                self.on_connect_finished(attempt, result)
            }
            SupervisorMsg::Reader(event) => self.on_reader_event(event),
        }
    }

    fn prime_token(&mut self) {
        if self.priming {
            return;
        }
        self.priming = true;
        debug!("priming connection token to learn reader location");
        let tokens = self.tokens.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let result = tokens.prime().await;
            let _ = mailbox.send(Command::Supervisor(SupervisorMsg::TokenPrimed(result)));
        });
    }

    fn on_token_primed(&mut self, result: Result<(), TokenError>) {
        self.priming = false;
        if let Err(e) = result {
            warn!(error = %e, "unable to prime connection token");
        }
        if !self.active {
            return;
        }
        if self.tokens.location_id().is_some() {
            self.ensure_connected();
        } else {
            self.schedule_check(self.location_retry);
        }
    }

    fn start_discovery(&mut self) {
        self.cancel_discovery();
        self.attempt += 1;
        let attempt = self.attempt;
        let cancel = CancellationToken::new();
        self.discovery_cancel = Some(cancel.clone());
        let message = self.discovery.simulated.then(|| "simulated".to_owned());
        self.transition(ReaderConnectionState::Discovering, message);

        let sdk = self.sdk.clone();
        let config = self.discovery.clone();
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
            let forward = async {
                while let Some(readers) = updates_rx.recv().await {
                    let msg = SupervisorMsg::ReadersDiscovered { attempt, readers };
                    let _ = mailbox.send(Command::Supervisor(msg));
                }
            };
            let (result, ()) = tokio::join!(sdk.discover_readers(config, updates_tx, cancel), forward);
            let msg = SupervisorMsg::DiscoveryFinished { attempt, result };
            let _ = mailbox.send(Command::Supervisor(msg));
        });
    }

    fn on_readers_discovered(&mut self, attempt: u64, readers: Vec<Reader>) {
        if attempt != self.attempt || self.state != ReaderConnectionState::Discovering {
            return;
        }
        // First reader seen wins.
        let Some(reader) = readers.into_iter().next() else {
            return;
        };
        self.cancel_discovery();
        self.connect(reader);
    }

    fn connect(&mut self, reader: Reader) {
        let Some(location_id) = self.tokens.location_id() else {
            self.transition(ReaderConnectionState::Idle, None);
            self.prime_token();
            return;
        };
        let attempt = self.attempt;
        self.transition(
            ReaderConnectionState::Connecting,
            Some(reader.display_name().to_owned()),
        );

        let sdk = self.sdk.clone();
        let mailbox = self.mailbox.clone();
        let listener = self.listener.clone();
        let config = ConnectionConfig {
            location_id,
            auto_reconnect_on_unexpected_disconnect: true,
        };
        tokio::spawn(async move {
            let result = sdk.connect_reader(reader, config, listener).await;
            let _ = mailbox.send(Command::Supervisor(SupervisorMsg::ConnectFinished {
                attempt,
                result,
            }));
        });
    }

    fn on_discovery_finished(&mut self, attempt: u64, result: Result<(), SdkError>) {
        if attempt != self.attempt || self.state != ReaderConnectionState::Discovering {
            return;
        }
        self.discovery_cancel = None;
        match result {
            Ok(()) => {
                warn!("reader discovery finished without any reader");
                self.transition(
                    ReaderConnectionState::Idle,
                    Some("no reader discovered".to_owned()),
                );
            }
            Err(SdkError::Canceled) => {
                self.transition(ReaderConnectionState::Idle, None);
                return;
            }
            Err(e) => {
                warn!(error = %e, "reader discovery failed");
                self.transition(ReaderConnectionState::Error, Some(e.to_string()));
            }
        }
        self.schedule_check(self.location_retry);
    }

    fn on_connect_finished(&mut self, attempt: u64, result: Result<Reader, SdkError>) {
        if attempt != self.attempt || self.state != ReaderConnectionState::Connecting {
            return;
        }
        match result {
            Ok(reader) => {
                info!(reader = reader.display_name(), "reader connected");
                self.transition(
                    ReaderConnectionState::Connected,
                    Some(reader.display_name().to_owned()),
                );
            }
            Err(e) => {
                warn!(error = %e, "reader connect failed");
                self.transition(ReaderConnectionState::Error, Some(e.to_string()));
                self.ensure_connected();
            }
        }
    }

    fn on_reader_event(&mut self, event: ReaderEvent) {
        if !self.active {
            return;
        }
        match event {
            ReaderEvent::ReconnectStarted { reader, reason } => {
                info!(reader = reader.display_name(), reason = %reason, "reader reconnecting");
                self.transition(
                    ReaderConnectionState::Disconnected,
                    Some(format!("reconnecting: {reason}")),
                );
            }
            ReaderEvent::ReconnectSucceeded { reader } => {
                info!(reader = reader.display_name(), "reader reconnected");
                self.transition(
                    ReaderConnectionState::Connected,
                    Some(reader.display_name().to_owned()),
                );
            }
            ReaderEvent::ReconnectFailed { reader } => {
                warn!(reader = reader.display_name(), "reader reconnect failed");
                self.on_connection_lost("reconnect failed".to_owned());
            }
            ReaderEvent::Disconnected { reason } => {
                warn!(reason = %reason, "reader disconnected");
                self.on_connection_lost(reason);
            }
        }
    }

    fn on_connection_lost(&mut self, reason: String) {
        self.attempt += 1;
        self.cancel_discovery();
        self.transition(ReaderConnectionState::Disconnected, Some(reason));
        self.ensure_connected();
    }

    /// Arms a single retry timer; does nothing if one is already pending.
    fn schedule_check(&mut self, delay: Duration) {
        if self.retry.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        self.retry = Some(cancel.clone());
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = mailbox.send(Command::Supervisor(SupervisorMsg::Check));
                }
            }
        });
    }

    fn cancel_discovery(&mut self) {
        if let Some(cancel) = self.discovery_cancel.take() {
            debug!("canceling reader discovery");
            cancel.cancel();
        }
    }

    /// Records and emits the new state. Repeating the current state with the
    /// same message is a no-op.
    fn transition(&mut self, state: ReaderConnectionState, message: Option<String>) {
        if self.state == state && self.message == message {
            return;
        }
        debug!(from = %self.state, to = %state, "reader state transition");
        self.state = state;
        self.message = message.clone();
        self.sink
            .emit(TerminalEvent::ReaderStatus(ReaderStatusEvent::now(state, message)));
    }
}

fn spawn_listener_forwarder(
    mailbox: mpsc::UnboundedSender<Command>,
) -> mpsc::UnboundedSender<ReaderEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if mailbox
                .send(Command::Supervisor(SupervisorMsg::Reader(event)))
                .is_err()
            {
                break;
            }
        }
    });
    tx
}
