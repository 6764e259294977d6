use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Network identity of a test runner. Two runners are the same runner when
/// host and port match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Runner {
    pub host: String,
    pub port: u16,
}

impl Runner {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address in `host:port` form, suitable for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registry bookkeeping for one runner
#[derive(Debug, Clone, Serialize)]
pub struct RunnerState {
    #[serde(flatten)]
    pub runner: Runner,
    pub registered_at: DateTime<Utc>,
    /// Last time the runner answered a heartbeat (or registered)
    pub last_contact: DateTime<Utc>,
}

impl RunnerState {
    pub fn new(runner: Runner) -> Self {
        let now = Utc::now();
        Self {
            runner,
            registered_at: now,
            last_contact: now,
        }
    }

    pub fn renew(&mut self) {
        self.last_contact = Utc::now();
    }
}

/// Outcome of [`RunnerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The runner was not known before
    New,
    /// The runner was already registered; its entry was refreshed in place
    Renewed,
}

/// The dispatcher's set of known runners, kept in registration order.
#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: Vec<RunnerState>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner. Registering an identity twice keeps a single entry.
    pub fn register(&mut self, runner: Runner) -> Registration {
        if let Some(existing) = self.runners.iter_mut().find(|s| s.runner == runner) {
            existing.renew();
            tracing::info!(runner = %runner, "Runner re-registered");
            return Registration::Renewed;
        }

        tracing::info!(runner = %runner, "Runner registered");
        self.runners.push(RunnerState::new(runner));
        Registration::New
    }

    /// Owned snapshot of the current membership, in registration order.
    pub fn list(&self) -> Vec<Runner> {
        self.runners.iter().map(|s| s.runner.clone()).collect()
    }

    pub fn all_runners(&self) -> &[RunnerState] {
        &self.runners
    }

    pub fn contains(&self, runner: &Runner) -> bool {
        self.runners.iter().any(|s| &s.runner == runner)
    }

    /// Remove a runner. Returns false if it was not registered.
    pub fn evict(&mut self, runner: &Runner) -> bool {
        let before = self.runners.len();
        self.runners.retain(|s| &s.runner != runner);
        before != self.runners.len()
    }

    /// Record a successful heartbeat
    pub fn renew(&mut self, runner: &Runner) {
        if let Some(state) = self.runners.iter_mut().find(|s| &s.runner == runner) {
            state.renew();
        }
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}
