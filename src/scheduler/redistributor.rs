use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::scheduler::assigner::AssignmentEngine;
use crate::scheduler::state::SchedulerState;

/// Drives placement of every pending commit.
///
/// Runs a pass whenever new work is signalled and otherwise every
/// `interval`. It is the only caller of the [`AssignmentEngine`], so a commit
/// never has two placement attempts in flight.
#[derive(Debug, Clone)]
pub struct Redistributor {
    state: SchedulerState,
    engine: AssignmentEngine,
    interval: Duration,
}

impl Redistributor {
    pub fn new(state: SchedulerState, engine: AssignmentEngine, interval: Duration) -> Self {
        Self {
            state,
            engine,
            interval,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            self.redistribute(&shutdown).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.state.work_available() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::debug!("Redistributor stopped");
    }

    /// Try to place every commit currently pending. Returns how many were placed.
    pub async fn redistribute(&self, shutdown: &CancellationToken) -> usize {
        let pending = self.state.pending().await;
        if pending.is_empty() {
            return 0;
        }

        tracing::debug!(pending = ?pending, "Redistributing pending commits");
        let mut placed = 0;
        for commit_id in pending {
            if shutdown.is_cancelled() {
                break;
            }
            if self.engine.dispatch(&commit_id, shutdown).await.is_some() {
                placed += 1;
            }
        }
        placed
    }
}
