use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::error::{CiError, Result};
use crate::protocol::codec::ResponseCodec;
use crate::protocol::message::{ProtocolError, Request, Response};

/// Send one request to `addr` and wait for its response.
///
/// The write half is closed after the request so the peer sees the end of the
/// frame. The whole exchange, connect included, is bounded by `timeout`.
pub async fn communicate(addr: &str, request: Request, timeout: Duration) -> Result<Response> {
    match tokio::time::timeout(timeout, exchange(addr, request)).await {
        Ok(result) => result,
        Err(_) => Err(CiError::Timeout(addr.to_string())),
    }
}

async fn exchange(addr: &str, request: Request) -> Result<Response> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = Framed::new(stream, ResponseCodec);

    framed.send(request).await?;
    framed.get_mut().shutdown().await?;

    match framed.next().await {
        Some(response) => Ok(response?),
        None => Err(ProtocolError::EmptyResponse.into()),
    }
}

/// Like [`communicate`], but any response other than `expected` is an error.
pub async fn expect_response(
    addr: &str,
    request: Request,
    expected: Response,
    timeout: Duration,
) -> Result<()> {
    let response = communicate(addr, request, timeout).await?;
    if response == expected {
        Ok(())
    } else {
        Err(CiError::UnexpectedResponse {
            peer: addr.to_string(),
            response,
        })
    }
}
