//! Wire protocol spoken between the dispatcher, runners and the observer.
//!
//! Every exchange is one request followed by one response on a fresh TCP
//! connection. Requests are colon-delimited ASCII commands:
//!
//! ```text
//! status | ping | register:<host>:<port> | dispatch:<commit_id>
//! runtest:<commit_id> | result:<commit_id>:<length>:<payload>
//! ```
//!
//! # Framing
//!
//! A `result` frame carries an explicit byte length, so it is complete as soon
//! as the declared payload has arrived, however large it is. Every other frame
//! ends when the sender half-closes its side of the connection. Responses are
//! likewise read until the peer closes. See [`codec`] for the decoders.

pub mod client;
pub mod codec;
pub mod message;

pub use client::{communicate, expect_response};
pub use codec::{RequestCodec, ResponseCodec};
pub use message::{ProtocolError, Request, Response};

/// Upper bound for any frame that does not carry an explicit length.
pub const MAX_FRAME_LEN: usize = 1024;

/// Upper bound for the declared payload length of a `result` frame.
pub const MAX_RESULT_LEN: usize = 16 * 1024 * 1024;
