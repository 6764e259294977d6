use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::protocol::{communicate, Request, Response};
use crate::scheduler::registry::Runner;
use crate::scheduler::state::{DispatchRecord, SchedulerState};

/// Places commits on runners.
///
/// A placement attempt walks a registry snapshot in registration order and
/// sends `runtest:<commit>` to each runner. The first runner to answer `ok`
/// gets the commit; runners after it are not contacted.
///
/// The commit is assigned to a runner before it is offered and released again
/// if the runner turns it down. A result pushed before the runner's `ok`
/// arrives therefore always finds the commit dispatched.
#[derive(Debug, Clone)]
pub struct AssignmentEngine {
    state: SchedulerState,
    request_timeout: Duration,
    backoff: Duration,
}

impl AssignmentEngine {
    pub fn new(state: SchedulerState, request_timeout: Duration, backoff: Duration) -> Self {
        Self {
            state,
            request_timeout,
            backoff,
        }
    }

    /// One scan over the registry. Returns the runner that took the commit.
    pub async fn try_place(&self, commit_id: &str) -> Option<Runner> {
        let runners = self.state.runners().await;

        for runner in runners {
            match self.state.record_dispatch(commit_id, &runner).await {
                DispatchRecord::Recorded => {}
                DispatchRecord::RunnerGone => {
                    tracing::debug!(commit_id, runner = %runner, "Runner evicted since snapshot");
                    continue;
                }
                DispatchRecord::NotPending => {
                    tracing::warn!(commit_id, runner = %runner, "Commit no longer pending");
                    return None;
                }
            }

            let request = Request::RunTest {
                commit_id: commit_id.to_string(),
            };
            match communicate(&runner.addr(), request, self.request_timeout).await {
                Ok(Response::Ok) => {
                    tracing::info!(commit_id, runner = %runner, "Commit dispatched");
                    return Some(runner);
                }
                Ok(Response::Busy) => {
                    tracing::debug!(commit_id, runner = %runner, "Runner busy");
                }
                Ok(other) => {
                    tracing::warn!(
                        commit_id,
                        runner = %runner,
                        response = %other,
                        "Runner refused commit"
                    );
                }
                Err(e) => {
                    tracing::debug!(commit_id, runner = %runner, error = %e, "Runner unreachable");
                }
            }

            if !self.state.release_dispatch(commit_id, &runner).await {
                // Completed by an early result, or requeued by an eviction.
                if !self.state.is_pending(commit_id).await {
                    return None;
                }
            }
        }

        None
    }

    /// Retry [`try_place`](Self::try_place) with a fixed backoff until the
    /// commit is placed, leaves the pending queue, or shutdown is requested.
    pub async fn dispatch(&self, commit_id: &str, shutdown: &CancellationToken) -> Option<Runner> {
        loop {
            if shutdown.is_cancelled() || !self.state.is_pending(commit_id).await {
                return None;
            }

            if let Some(runner) = self.try_place(commit_id).await {
                return Some(runner);
            }

            tracing::debug!(
                commit_id,
                backoff_ms = self.backoff.as_millis() as u64,
                "No runner accepted commit"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}
