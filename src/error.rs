use thiserror::Error;

use crate::protocol::{ProtocolError, Response};

#[derive(Error, Debug)]
pub enum CiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unexpected response from {peer}: {response}")]
    UnexpectedResponse { peer: String, response: Response },

    #[error("Timed out talking to {0}")]
    Timeout(String),

    #[error("Could not bind to ports in range {start}-{end}")]
    Bind { start: u16, end: u16 },

    #[error("Can't register with dispatcher at {addr}: {reason}")]
    Registration { addr: String, reason: String },

    #[error("Lost contact with dispatcher at {addr}")]
    DispatcherLost { addr: String },

    #[error("Invalid commit id: {0:?}")]
    InvalidCommitId(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CiError>;
