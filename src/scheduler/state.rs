use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::scheduler::ledger::CommitLedger;
use crate::scheduler::registry::{Registration, Runner, RunnerRegistry};

/// Outcome of submitting a commit through the dispatcher's front door
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Accepted for scheduling. `queued` is false when the commit was already
    /// pending or dispatched.
    Accepted { queued: bool },
    NoRunners,
}

/// Outcome of recording a runner's acceptance of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRecord {
    Recorded,
    /// The runner was evicted while it was being asked
    RunnerGone,
    /// The commit is no longer waiting for placement
    NotPending,
}

/// Registry and ledger shared by connection handlers and background loops.
///
/// Each structure sits behind its own lock. Operations touching both always
/// lock the registry first, then the ledger, and no lock is held across
/// network I/O.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    pub registry: Arc<RwLock<RunnerRegistry>>,
    pub ledger: Arc<RwLock<CommitLedger>>,
    work_available: Arc<Notify>,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a runner.
    ///
    /// A runner only registers at startup, so a re-registration means the
    /// process restarted and anything still assigned to it is lost work.
    pub async fn register_runner(&self, runner: Runner) -> Registration {
        let mut registry = self.registry.write().await;
        let registration = registry.register(runner.clone());
        if registration == Registration::Renewed {
            let requeued = self.ledger.write().await.requeue_all_for(&runner);
            if !requeued.is_empty() {
                tracing::warn!(
                    runner = %runner,
                    commits = ?requeued,
                    "Requeued work of restarted runner"
                );
                self.wake();
            }
        }
        registration
    }

    /// Front door for new commits. Returns immediately; placement happens in
    /// the background.
    pub async fn submit(&self, commit_id: &str) -> Submission {
        let registry = self.registry.read().await;
        if registry.is_empty() {
            return Submission::NoRunners;
        }

        let queued = self.ledger.write().await.enqueue(commit_id);
        drop(registry);

        if queued {
            tracing::info!(commit_id, "Commit queued for dispatch");
            self.wake();
        }
        Submission::Accepted { queued }
    }

    /// Assign a pending commit to a registered runner.
    pub async fn record_dispatch(&self, commit_id: &str, runner: &Runner) -> DispatchRecord {
        let registry = self.registry.read().await;
        if !registry.contains(runner) {
            return DispatchRecord::RunnerGone;
        }

        let mut ledger = self.ledger.write().await;
        if ledger.mark_dispatched(commit_id, runner) {
            DispatchRecord::Recorded
        } else {
            DispatchRecord::NotPending
        }
    }

    /// Put a commit reserved for `runner` back in the queue after the runner
    /// turned it down.
    pub async fn release_dispatch(&self, commit_id: &str, runner: &Runner) -> bool {
        self.ledger.write().await.release(commit_id, runner)
    }

    /// Remove a runner and put its in-flight commits back in the pending
    /// queue, as one step.
    pub async fn evict_runner(&self, runner: &Runner) -> Vec<String> {
        let mut registry = self.registry.write().await;
        if !registry.evict(runner) {
            return Vec::new();
        }

        let requeued = self.ledger.write().await.requeue_all_for(runner);
        drop(registry);

        tracing::warn!(runner = %runner, commits = ?requeued, "Runner evicted");
        if !requeued.is_empty() {
            self.wake();
        }
        requeued
    }

    /// Record the arrival of a commit's result.
    pub async fn complete(&self, commit_id: &str) -> bool {
        self.ledger.write().await.mark_completed(commit_id)
    }

    pub async fn renew_runner(&self, runner: &Runner) {
        self.registry.write().await.renew(runner);
    }

    pub async fn runners(&self) -> Vec<Runner> {
        self.registry.read().await.list()
    }

    pub async fn pending(&self) -> Vec<String> {
        self.ledger.read().await.pending()
    }

    pub async fn is_pending(&self, commit_id: &str) -> bool {
        self.ledger.read().await.is_pending(commit_id)
    }

    /// Signal that the pending queue gained work.
    pub fn wake(&self) {
        self.work_available.notify_one();
    }

    /// Wait for [`wake`](Self::wake). A wake-up sent while nobody waits is
    /// kept for the next caller.
    pub async fn work_available(&self) {
        self.work_available.notified().await;
    }
}
