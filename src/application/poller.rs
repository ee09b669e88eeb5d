use super::gate::FlowGate;
use super::orchestrator::Command;
use crate::domain::device::DeviceIdentity;
use crate::domain::ports::CoordinationBackend;
use crate::error::BackendError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a single poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A flow is active; no claim was attempted.
    Busy,
    /// Origin or credential not resolvable yet.
    NotReady,
    Empty,
    Failed,
    Dispatched,
}

/// Asks the backend for the next session assigned to this device, one request
/// at a time, sleeping a fixed interval after each completed tick.
pub struct SessionPoller {
    backend: Arc<dyn CoordinationBackend>,
    device: DeviceIdentity,
    gate: FlowGate,
    interval: Duration,
    mailbox: mpsc::UnboundedSender<Command>,
}

impl SessionPoller {
    pub fn new(
        backend: Arc<dyn CoordinationBackend>,
        device: DeviceIdentity,
        gate: FlowGate,
        interval: Duration,
        mailbox: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            backend,
            device,
            gate,
            interval,
            mailbox,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            device_id = %self.device,
            interval_ms = self.interval.as_millis() as u64,
            "session poller started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.poll_once().await;
            if self.mailbox.is_closed() {
                break;
            }
        }
        info!("session poller stopped");
    }

    pub async fn poll_once(&self) -> PollOutcome {
        if self.gate.is_busy() {
            return PollOutcome::Busy;
        }
        match self.backend.claim_next_session(&self.device).await {
            Ok(None) => PollOutcome::Empty,
            Ok(Some(session)) => {
                if !self.gate.try_acquire() {
                    warn!(session_id = %session.id, "claimed a session while busy");
                }
                info!(session_id = %session.id, "claimed payment session");
                match self.mailbox.send(Command::SessionClaimed(session)) {
                    Ok(()) => PollOutcome::Dispatched,
                    Err(_) => {
                        self.gate.release();
                        PollOutcome::Failed
                    }
                }
            }
            Err(BackendError::NotReady(reason)) => {
                debug!(reason = %reason, "skipping poll, backend not ready");
                PollOutcome::NotReady
            }
            Err(e) => {
                warn!(error = %e, "session poll failed");
                PollOutcome::Failed
            }
        }
    }
}
