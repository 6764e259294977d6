use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CiError, Result};

pub const DEFAULT_DISPATCHER_PORT: u16 = 8888;
pub const DEFAULT_DISPATCHER_ADDR: &str = "localhost:8888";
pub const DEFAULT_RUNNER_PORT_START: u16 = 8900;

/// Configuration for the dispatcher process.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding one result file per commit id
    pub results_dir: PathBuf,
    /// Port for the read-only status dashboard (disabled when `None`)
    pub dashboard_port: Option<u16>,
    /// Period of the heartbeat evictor
    pub heartbeat_interval_ms: u64,
    /// How long a runner may take to answer a ping
    pub probe_timeout_ms: u64,
    /// Sleep between two full placement scans that found no taker
    pub dispatch_backoff_ms: u64,
    /// How often the redistributor rescans when nothing woke it up
    pub redistribute_interval_ms: u64,
    /// Timeout for a `runtest` exchange with a runner
    pub request_timeout_ms: u64,
    /// How long an inbound connection may take to deliver its request
    pub read_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_DISPATCHER_PORT,
            results_dir: PathBuf::from("test_results"),
            dashboard_port: None,
            heartbeat_interval_ms: 1_000,
            probe_timeout_ms: 1_000,
            dispatch_backoff_ms: 2_000,
            redistribute_interval_ms: 5_000,
            request_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
        }
    }
}

impl DispatcherConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_results_dir(mut self, results_dir: impl Into<PathBuf>) -> Self {
        self.results_dir = results_dir.into();
        self
    }

    pub fn with_dashboard_port(mut self, port: u16) -> Self {
        self.dashboard_port = Some(port);
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dispatch_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatch_backoff_ms)
    }

    pub fn redistribute_interval(&self) -> Duration {
        Duration::from_millis(self.redistribute_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Configuration for a test runner process.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub host: String,
    /// Fixed port. When `None` the runner probes upward from `port_range_start`.
    pub port: Option<u16>,
    pub port_range_start: u16,
    pub port_probe_attempts: u16,
    /// Dispatcher address in `host:port` form
    pub dispatcher_addr: String,
    /// Repository the tests run against
    pub repo: PathBuf,
    /// Shell command that runs the test suite inside `repo`
    pub test_command: String,
    /// Lease lifetime: how long the runner tolerates silence from the dispatcher
    pub lease_ttl_ms: u64,
    pub lease_check_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// How long an inbound connection may take to deliver its request
    pub read_timeout_ms: u64,
    /// Pause between attempts to deliver a result the dispatcher did not take
    pub result_retry_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            port_range_start: DEFAULT_RUNNER_PORT_START,
            port_probe_attempts: 100,
            dispatcher_addr: DEFAULT_DISPATCHER_ADDR.to_string(),
            repo: PathBuf::from("."),
            test_command: "python -m unittest discover -s tests".to_string(),
            lease_ttl_ms: 10_000,
            lease_check_interval_ms: 5_000,
            request_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            result_retry_ms: 1_000,
        }
    }
}

impl RunnerConfig {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_dispatcher(mut self, addr: impl Into<String>) -> Self {
        self.dispatcher_addr = addr.into();
        self
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn lease_check_interval(&self) -> Duration {
        Duration::from_millis(self.lease_check_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn result_retry(&self) -> Duration {
        Duration::from_millis(self.result_retry_ms)
    }
}

/// Configuration for the repository observer.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub dispatcher_addr: String,
    pub repo: PathBuf,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            dispatcher_addr: DEFAULT_DISPATCHER_ADDR.to_string(),
            repo: PathBuf::from("."),
            poll_interval_ms: 5_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Validate a `host:port` address given on the command line.
pub fn parse_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| CiError::Config(format!("expected host:port, got {:?}", addr)))?;
    if host.is_empty() {
        return Err(CiError::Config(format!("missing host in {:?}", addr)));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| CiError::Config(format!("invalid port in {:?}", addr)))?;
    Ok((host.to_string(), port))
}
