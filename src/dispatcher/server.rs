use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::results::ResultStore;
use crate::error::CiError;
use crate::protocol::{ProtocolError, Request, RequestCodec, Response};
use crate::scheduler::{Runner, SchedulerState, Submission};

/// Accepts connections for the dispatcher, one task per connection.
pub struct DispatcherServer {
    listener: TcpListener,
    handler: Arc<DispatcherHandler>,
}

impl DispatcherServer {
    /// `read_timeout` bounds how long a connection may take to deliver its
    /// request. Peers that stay silent past it are dropped.
    pub fn new(
        listener: TcpListener,
        state: SchedulerState,
        results: ResultStore,
        read_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            handler: Arc::new(DispatcherHandler {
                state,
                results,
                read_timeout,
            }),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::trace!(peer = %peer, "Connection accepted");
                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            handler.handle_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }
        tracing::info!("Dispatcher stopped accepting connections");
    }
}

struct DispatcherHandler {
    state: SchedulerState,
    results: ResultStore,
    read_timeout: Duration,
}

impl DispatcherHandler {
    async fn handle_connection(&self, stream: TcpStream) {
        let mut framed = Framed::new(stream, RequestCodec);

        let Ok(next) = tokio::time::timeout(self.read_timeout, framed.next()).await else {
            tracing::debug!(
                timeout_ms = self.read_timeout.as_millis() as u64,
                "No complete request before the read deadline"
            );
            return;
        };

        let response = match next {
            Some(Ok(request)) => self.handle_request(request).await,
            Some(Err(ProtocolError::Io(e))) => {
                tracing::debug!(error = %e, "Connection failed before a request arrived");
                return;
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Invalid command");
                Response::InvalidCommand
            }
            None => return,
        };

        if let Err(e) = framed.send(response).await {
            tracing::debug!(error = %e, "Failed to send response");
        }
    }

    async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Status => Response::Ok,
            Request::Register { host, port } => {
                self.state.register_runner(Runner::new(host, port)).await;
                Response::Ok
            }
            Request::Dispatch { commit_id } => match self.state.submit(&commit_id).await {
                Submission::Accepted { .. } => Response::Ok,
                Submission::NoRunners => {
                    tracing::warn!(commit_id, "Dispatch refused, no runners are registered");
                    Response::NoRunners
                }
            },
            Request::Result { commit_id, payload } => {
                self.handle_result(&commit_id, &payload).await
            }
            other => {
                tracing::debug!(command = other.command(), "Command not served by the dispatcher");
                Response::InvalidCommand
            }
        }
    }

    async fn handle_result(&self, commit_id: &str, payload: &str) -> Response {
        match self.results.write(commit_id, payload).await {
            Ok(path) => {
                let completed = self.state.complete(commit_id).await;
                tracing::info!(
                    commit_id,
                    path = %path.display(),
                    bytes = payload.len(),
                    completed,
                    "Result stored"
                );
                Response::Ok
            }
            Err(CiError::InvalidCommitId(id)) => {
                tracing::warn!(commit_id = %id, "Result rejected");
                Response::InvalidCommand
            }
            Err(e) => {
                tracing::error!(commit_id, error = %e, "Failed to store result");
                Response::Other(format!("Could not store result: {}", e))
            }
        }
    }
}
