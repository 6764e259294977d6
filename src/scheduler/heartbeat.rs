use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::protocol::{communicate, Request, Response};
use crate::scheduler::registry::Runner;
use crate::scheduler::state::SchedulerState;

/// Periodically pings every registered runner and evicts the ones that do not
/// answer `pong`.
#[derive(Debug, Clone)]
pub struct HeartbeatEvictor {
    state: SchedulerState,
    interval: Duration,
    probe_timeout: Duration,
}

impl HeartbeatEvictor {
    pub fn new(state: SchedulerState, interval: Duration, probe_timeout: Duration) -> Self {
        Self {
            state,
            interval,
            probe_timeout,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.check_runners().await;
                }
            }
        }
        tracing::debug!("Heartbeat evictor stopped");
    }

    /// Probe a snapshot of the registry once. Returns the evicted runners.
    pub async fn check_runners(&self) -> Vec<Runner> {
        let runners = self.state.runners().await;
        let probes = runners.iter().map(|runner| self.probe(runner));
        let results = join_all(probes).await;

        let mut evicted = Vec::new();
        for (runner, alive) in runners.into_iter().zip(results) {
            if alive {
                self.state.renew_runner(&runner).await;
            } else {
                self.state.evict_runner(&runner).await;
                evicted.push(runner);
            }
        }
        evicted
    }

    async fn probe(&self, runner: &Runner) -> bool {
        match communicate(&runner.addr(), Request::Ping, self.probe_timeout).await {
            Ok(Response::Pong) => true,
            Ok(other) => {
                tracing::warn!(runner = %runner, response = %other, "Unexpected heartbeat reply");
                false
            }
            Err(e) => {
                tracing::warn!(runner = %runner, error = %e, "Heartbeat failed");
                false
            }
        }
    }
}
