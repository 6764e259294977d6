pub mod config;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod git;
pub mod observer;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
