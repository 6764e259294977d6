//! Test runner side of the protocol.
//!
//! # Components
//!
//! - [`RunnerNode`]: binds a port, registers with the dispatcher, serves requests
//! - [`ExecutionGate`]: single-flight Idle/Busy admission for `runtest`
//! - [`TestExecutor`]: runs the suite for a commit ([`ShellTestExecutor`] in production)
//! - [`LivenessMonitor`]: shuts the runner down once its [`Lease`] lapses and
//!   the dispatcher stops answering
//!
//! # Execution Flow
//!
//! 1. Dispatcher sends `runtest:<commit>`
//! 2. Gate idle: reply `ok`, close the connection, run the tests
//! 3. Gate returns to idle, the report is pushed as `result:<commit>:<len>:<report>`
//! 4. Gate busy: reply `BUSY` and do nothing else

pub mod executor;
pub mod gate;
pub mod liveness;
pub mod runner;

pub use executor::{ShellTestExecutor, TestExecutor};
pub use gate::ExecutionGate;
pub use liveness::{Lease, LivenessMonitor};
pub use runner::RunnerNode;
