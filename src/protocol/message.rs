use std::fmt;

use thiserror::Error;

pub const STATUS: &str = "status";
pub const PING: &str = "ping";
pub const REGISTER: &str = "register";
pub const DISPATCH: &str = "dispatch";
pub const RUNTEST: &str = "runtest";
pub const RESULT: &str = "result";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("Malformed {command} request: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },

    #[error("Frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },

    #[error("Result payload truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Peer closed the connection without responding")]
    EmptyResponse,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A request understood by the dispatcher or a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status,
    Ping,
    Register { host: String, port: u16 },
    Dispatch { commit_id: String },
    RunTest { commit_id: String },
    Result { commit_id: String, payload: String },
}

impl Request {
    /// Parse a complete textual frame.
    ///
    /// `result` frames must carry a length equal to the payload's byte length.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let (command, args) = match frame.split_once(':') {
            Some((command, args)) => (command, Some(args)),
            None => (frame, None),
        };

        match (command, args) {
            (STATUS, None) => Ok(Request::Status),
            (PING, None) => Ok(Request::Ping),
            (REGISTER, Some(args)) => parse_register(args),
            (DISPATCH, Some(args)) => Ok(Request::Dispatch {
                commit_id: parse_commit_id(DISPATCH, args)?,
            }),
            (RUNTEST, Some(args)) => Ok(Request::RunTest {
                commit_id: parse_commit_id(RUNTEST, args)?,
            }),
            (RESULT, Some(args)) => parse_result(args),
            _ => Err(ProtocolError::UnknownCommand(frame.to_string())),
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Request::Status => STATUS,
            Request::Ping => PING,
            Request::Register { .. } => REGISTER,
            Request::Dispatch { .. } => DISPATCH,
            Request::RunTest { .. } => RUNTEST,
            Request::Result { .. } => RESULT,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Status => write!(f, "{}", STATUS),
            Request::Ping => write!(f, "{}", PING),
            Request::Register { host, port } => write!(f, "{}:{}:{}", REGISTER, host, port),
            Request::Dispatch { commit_id } => write!(f, "{}:{}", DISPATCH, commit_id),
            Request::RunTest { commit_id } => write!(f, "{}:{}", RUNTEST, commit_id),
            Request::Result { commit_id, payload } => {
                write!(f, "{}:{}:{}:{}", RESULT, commit_id, payload.len(), payload)
            }
        }
    }
}

fn parse_register(args: &str) -> Result<Request, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::Malformed {
        command: REGISTER,
        reason: reason.to_string(),
    };

    let (host, port) = args
        .rsplit_once(':')
        .ok_or_else(|| malformed("expected <host>:<port>"))?;
    if host.is_empty() || host.contains(':') {
        return Err(malformed("invalid host"));
    }
    let port = port.parse::<u16>().map_err(|_| malformed("invalid port"))?;

    Ok(Request::Register {
        host: host.to_string(),
        port,
    })
}

fn parse_commit_id(command: &'static str, args: &str) -> Result<String, ProtocolError> {
    let commit_id = args.trim();
    if commit_id.is_empty() || commit_id.contains(':') {
        return Err(ProtocolError::Malformed {
            command,
            reason: "invalid commit id".to_string(),
        });
    }
    Ok(commit_id.to_string())
}

fn parse_result(args: &str) -> Result<Request, ProtocolError> {
    let malformed = |reason: &str| ProtocolError::Malformed {
        command: RESULT,
        reason: reason.to_string(),
    };

    let mut parts = args.splitn(3, ':');
    let commit_id = parts.next().unwrap_or_default();
    let length = parts.next().ok_or_else(|| malformed("missing length"))?;
    let payload = parts.next().ok_or_else(|| malformed("missing payload"))?;

    let commit_id = parse_commit_id(RESULT, commit_id)?;
    let length = parse_length(length)?;
    if payload.len() != length {
        return Err(ProtocolError::Truncated {
            expected: length,
            actual: payload.len(),
        });
    }

    Ok(Request::Result {
        commit_id,
        payload: payload.to_string(),
    })
}

pub(crate) fn parse_length(raw: &str) -> Result<usize, ProtocolError> {
    raw.parse::<usize>().map_err(|_| ProtocolError::Malformed {
        command: RESULT,
        reason: format!("invalid length {:?}", raw),
    })
}

/// A response sent back on the same connection as the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Pong,
    Busy,
    NoRunners,
    InvalidCommand,
    Other(String),
}

impl Response {
    pub fn parse(frame: &str) -> Self {
        match frame {
            "ok" => Response::Ok,
            "pong" => Response::Pong,
            "BUSY" => Response::Busy,
            "No runners are registered" => Response::NoRunners,
            "Invalid command" => Response::InvalidCommand,
            other => Response::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Response::Ok => "ok",
            Response::Pong => "pong",
            Response::Busy => "BUSY",
            Response::NoRunners => "No runners are registered",
            Response::InvalidCommand => "Invalid command",
            Response::Other(other) => other,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
