use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide busy flag: at most one payment session is handled at a time.
///
/// Only the poller acquires the gate and only the orchestrator releases it.
#[derive(Debug, Clone, Default)]
pub struct FlowGate {
    busy: Arc<AtomicBool>,
}

impl FlowGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Marks the gate busy. Returns `false` if it already was.
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_exclusive_until_released() {
        let gate = FlowGate::new();
        let shared = gate.clone();

        assert!(!gate.is_busy());
        assert!(gate.try_acquire());
        assert!(shared.is_busy());
        assert!(!shared.try_acquire());

        shared.release();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire());
    }
}
