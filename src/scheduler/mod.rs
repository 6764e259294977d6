//! Dispatcher-side scheduling: who runs what, and recovery when a runner dies.
//!
//! - [`RunnerRegistry`]: known runners, in registration order
//! - [`CommitLedger`]: pending queue and dispatched map
//! - [`SchedulerState`]: both of the above behind locks, shared across tasks
//! - [`AssignmentEngine`]: first-accepting-runner placement with backoff
//! - [`HeartbeatEvictor`]: ping loop that evicts dead runners and requeues their work
//! - [`Redistributor`]: loop that keeps placing whatever is pending

pub mod assigner;
pub mod heartbeat;
pub mod ledger;
pub mod redistributor;
pub mod registry;
pub mod state;

pub use assigner::AssignmentEngine;
pub use heartbeat::HeartbeatEvictor;
pub use ledger::{CommitLedger, CommitStatus};
pub use redistributor::Redistributor;
pub use registry::{Registration, Runner, RunnerRegistry};
pub use state::{DispatchRecord, SchedulerState, Submission};
