use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-flight admission for test runs: `Idle -> Busy -> Idle`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGate {
    busy: Arc<AtomicBool>,
}

impl ExecutionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `Busy` if idle. The returned guard moves the gate back to
    /// `Idle` when dropped; `None` means a run is already in progress.
    pub fn try_acquire(&self) -> Option<GateGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one test run.
#[derive(Debug)]
pub struct GateGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
