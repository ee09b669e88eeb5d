use super::orchestrator::OrchestratorHandle;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reason reported when a flow is aborted because the host went to the background.
pub const ACTIVITY_PAUSED: &str = "activity-paused";

/// Memory pressure level reported by the host, using the platform's scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemoryTrimLevel(pub u32);

impl MemoryTrimLevel {
    pub const RUNNING_MODERATE: Self = Self(5);
    pub const RUNNING_LOW: Self = Self(10);
    pub const RUNNING_CRITICAL: Self = Self(15);
    pub const UI_HIDDEN: Self = Self(20);
    pub const BACKGROUND: Self = Self(40);
    pub const MODERATE: Self = Self(60);
    pub const COMPLETE: Self = Self(80);

    /// At or above `BACKGROUND` the process may be killed at any moment.
    pub fn requires_immediate_abort(self) -> bool {
        self >= Self::BACKGROUND
    }
}

impl fmt::Display for MemoryTrimLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aborts the active payment flow when the host application stays in the
/// background, so a payment is never left running unseen.
///
/// At most one delayed abort is pending at any time.
pub struct LifecycleGuard {
    orchestrator: OrchestratorHandle,
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl LifecycleGuard {
    pub fn new(orchestrator: OrchestratorHandle, delay: Duration) -> Self {
        Self {
            orchestrator,
            delay,
            pending: None,
        }
    }

    pub fn on_backgrounded(&mut self) {
        debug!("host backgrounded");
        self.schedule_abort(ACTIVITY_PAUSED);
    }

    pub fn on_foregrounded(&mut self) {
        debug!("host foregrounded");
        if self.clear_pending() {
            info!("pending lifecycle abort cleared: activity-resumed");
        }
    }

    /// The host became visible again after being stopped.
    pub fn on_started(&mut self) {
        debug!("host started");
        if self.orchestrator.start().is_err() {
            warn!("orchestrator gone, cannot start");
        }
    }

    /// The host is no longer visible at all. The orchestrator is stopped
    /// unless a payment is in progress, which is left to finish.
    pub fn on_stopped(&mut self) {
        debug!("host stopped");
        self.clear_pending();
        if self.orchestrator.stop_if_idle().is_err() {
            warn!("orchestrator gone, cannot stop");
        }
    }

    pub fn on_trim_memory(&mut self, level: MemoryTrimLevel) {
        debug!(level = level.0, "host trim memory");
        if !level.requires_immediate_abort() {
            return;
        }
        self.clear_pending();
        let reason = format!("trim-memory-{level}");
        if self.orchestrator.abort_active_flow(reason).is_err() {
            warn!("orchestrator gone, cannot abort on memory pressure");
        }
    }

    pub fn has_pending_abort(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| !pending.is_finished())
    }

    fn schedule_abort(&mut self, reason: &'static str) {
        self.clear_pending();
        let orchestrator = self.orchestrator.clone();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(reason, "lifecycle abort fired");
            if orchestrator.abort_active_flow(reason).is_err() {
                warn!("orchestrator gone, lifecycle abort dropped");
            }
        }));
    }

    fn clear_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) if !pending.is_finished() => {
                pending.abort();
                true
            }
            _ => false,
        }
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.clear_pending();
    }
}
