use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scheduler::registry::Runner;

/// Number of completed commit ids remembered for status queries.
const COMPLETED_HISTORY: usize = 10_000;

#[derive(Debug, Clone, Serialize)]
pub struct PendingCommit {
    pub commit_id: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchedCommit {
    pub commit_id: String,
    pub runner: Runner,
    pub enqueued_at: DateTime<Utc>,
    pub dispatched_at: DateTime<Utc>,
    #[serde(skip)]
    seq: u64,
}

/// Observable placement status of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommitStatus {
    Pending,
    Dispatched { runner: Runner },
    Completed,
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitStatus::Pending => write!(f, "pending"),
            CommitStatus::Dispatched { runner } => write!(f, "dispatched to {}", runner),
            CommitStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Tracks every commit between submission and result.
///
/// A commit lives in exactly one of the pending queue or the dispatched map.
/// Completed commits leave both; only their ids are remembered (bounded) so
/// callers can observe that placement finished.
#[derive(Debug, Default)]
pub struct CommitLedger {
    pending: VecDeque<PendingCommit>,
    dispatched: HashMap<String, DispatchedCommit>,
    completed: VecDeque<String>,
    completed_ids: HashSet<String>,
    completed_total: u64,
    next_seq: u64,
}

impl CommitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a commit for placement. No-op if it is already pending or
    /// dispatched.
    pub fn enqueue(&mut self, commit_id: &str) -> bool {
        if self.is_pending(commit_id) || self.dispatched.contains_key(commit_id) {
            tracing::debug!(commit_id, "Commit already scheduled");
            return false;
        }

        self.forget_completed(commit_id);
        self.pending.push_back(PendingCommit {
            commit_id: commit_id.to_string(),
            enqueued_at: Utc::now(),
        });
        true
    }

    /// Move a pending commit to the dispatched map.
    pub fn mark_dispatched(&mut self, commit_id: &str, runner: &Runner) -> bool {
        let Some(pos) = self.pending.iter().position(|p| p.commit_id == commit_id) else {
            tracing::warn!(
                commit_id,
                runner = %runner,
                "Commit is not pending, dispatch not recorded"
            );
            return false;
        };

        let Some(pending) = self.pending.remove(pos) else {
            return false;
        };
        self.next_seq += 1;
        self.dispatched.insert(
            commit_id.to_string(),
            DispatchedCommit {
                commit_id: commit_id.to_string(),
                runner: runner.clone(),
                enqueued_at: pending.enqueued_at,
                dispatched_at: Utc::now(),
                seq: self.next_seq,
            },
        );
        true
    }

    /// Undo [`mark_dispatched`](Self::mark_dispatched) when `runner` turned
    /// the commit down. The commit goes back to the head of the queue. Returns
    /// false if it is no longer assigned to `runner` (completed or requeued).
    pub fn release(&mut self, commit_id: &str, runner: &Runner) -> bool {
        if self.dispatched_to(commit_id) != Some(runner) {
            return false;
        }
        let Some(released) = self.dispatched.remove(commit_id) else {
            return false;
        };
        self.pending.push_front(PendingCommit {
            commit_id: released.commit_id,
            enqueued_at: released.enqueued_at,
        });
        true
    }

    /// Drop a dispatched commit once its result is in. Returns false for
    /// duplicate or late results.
    pub fn mark_completed(&mut self, commit_id: &str) -> bool {
        if self.dispatched.remove(commit_id).is_none() {
            return false;
        }

        self.completed_total += 1;
        self.completed_ids.insert(commit_id.to_string());
        self.completed.push_back(commit_id.to_string());
        if self.completed.len() > COMPLETED_HISTORY {
            if let Some(oldest) = self.completed.pop_front() {
                self.completed_ids.remove(&oldest);
            }
        }
        true
    }

    /// Move every commit dispatched to `runner` back to the pending queue.
    pub fn requeue_all_for(&mut self, runner: &Runner) -> Vec<String> {
        let mut orphaned: Vec<DispatchedCommit> = self
            .dispatched
            .values()
            .filter(|d| &d.runner == runner)
            .cloned()
            .collect();
        orphaned.sort_by_key(|d| d.seq);

        let now = Utc::now();
        orphaned
            .into_iter()
            .map(|d| {
                self.dispatched.remove(&d.commit_id);
                self.pending.push_back(PendingCommit {
                    commit_id: d.commit_id.clone(),
                    enqueued_at: now,
                });
                d.commit_id
            })
            .collect()
    }

    /// Snapshot of pending commit ids, oldest first.
    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().map(|p| p.commit_id.clone()).collect()
    }

    pub fn pending_commits(&self) -> impl Iterator<Item = &PendingCommit> {
        self.pending.iter()
    }

    /// Dispatched commits, oldest dispatch first
    pub fn dispatched_commits(&self) -> Vec<&DispatchedCommit> {
        let mut commits: Vec<&DispatchedCommit> = self.dispatched.values().collect();
        commits.sort_by_key(|d| d.seq);
        commits
    }

    pub fn is_pending(&self, commit_id: &str) -> bool {
        self.pending.iter().any(|p| p.commit_id == commit_id)
    }

    pub fn dispatched_to(&self, commit_id: &str) -> Option<&Runner> {
        self.dispatched.get(commit_id).map(|d| &d.runner)
    }

    pub fn status(&self, commit_id: &str) -> Option<CommitStatus> {
        if self.is_pending(commit_id) {
            Some(CommitStatus::Pending)
        } else if let Some(runner) = self.dispatched_to(commit_id) {
            Some(CommitStatus::Dispatched {
                runner: runner.clone(),
            })
        } else if self.completed_ids.contains(commit_id) {
            Some(CommitStatus::Completed)
        } else {
            None
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dispatched_len(&self) -> usize {
        self.dispatched.len()
    }

    pub fn completed_total(&self) -> u64 {
        self.completed_total
    }

    fn forget_completed(&mut self, commit_id: &str) {
        if self.completed_ids.remove(commit_id) {
            self.completed.retain(|id| id != commit_id);
        }
    }
}
