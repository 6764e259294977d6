use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::error::{CiError, Result};
use crate::protocol::{
    communicate, expect_response, ProtocolError, Request, RequestCodec, Response,
};
use crate::worker::executor::TestExecutor;
use crate::worker::gate::{ExecutionGate, GateGuard};
use crate::worker::liveness::{Lease, LivenessMonitor};

/// A test runner process: serves `ping` and `runtest` for the dispatcher.
pub struct RunnerNode {
    config: RunnerConfig,
    executor: Arc<dyn TestExecutor>,
    gate: ExecutionGate,
    lease: Arc<Lease>,
}

impl RunnerNode {
    pub fn new(config: RunnerConfig, executor: Arc<dyn TestExecutor>) -> Self {
        let lease = Arc::new(Lease::new(config.lease_ttl()));
        Self {
            config,
            executor,
            gate: ExecutionGate::new(),
            lease,
        }
    }

    pub fn gate(&self) -> ExecutionGate {
        self.gate.clone()
    }

    pub fn lease(&self) -> Arc<Lease> {
        self.lease.clone()
    }

    /// Bind the configured port, or probe upward from the start of the
    /// range when no port was given.
    ///
    /// # Errors
    ///
    /// Any bind error other than "address in use" is returned immediately;
    /// running out of candidate ports yields [`CiError::Bind`].
    pub async fn bind(&self) -> Result<(TcpListener, u16)> {
        if let Some(port) = self.config.port {
            let listener = TcpListener::bind((self.config.host.as_str(), port)).await?;
            return Ok((listener, port));
        }

        let start = self.config.port_range_start;
        let mut port = start;
        for _ in 0..self.config.port_probe_attempts {
            match TcpListener::bind((self.config.host.as_str(), port)).await {
                Ok(listener) => return Ok((listener, port)),
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    tracing::debug!(port, "Port in use, trying next");
                    port = match port.checked_add(1) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CiError::Bind { start, end: port })
    }

    /// Announce this runner to the dispatcher and start the lease.
    pub async fn register(&self, port: u16) -> Result<()> {
        let request = Request::Register {
            host: self.config.host.clone(),
            port,
        };
        expect_response(
            &self.config.dispatcher_addr,
            request,
            Response::Ok,
            self.config.request_timeout(),
        )
        .await
        .map_err(|e| CiError::Registration {
            addr: self.config.dispatcher_addr.clone(),
            reason: e.to_string(),
        })?;

        self.lease.renew();
        tracing::info!(
            host = %self.config.host,
            port,
            dispatcher = %self.config.dispatcher_addr,
            "Registered with dispatcher"
        );
        Ok(())
    }

    /// Bind, register and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Bind and registration failures are returned, as is losing the
    /// dispatcher while serving. All of them are fatal for the process.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let (listener, port) = self.bind().await?;
        self.register(port).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound (and registered) listener. The liveness
    /// monitor cancels `shutdown` when the dispatcher disappears.
    ///
    /// # Errors
    ///
    /// Returns [`CiError::DispatcherLost`] when serving stopped because the
    /// dispatcher went away. A requested shutdown returns `Ok`.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Runner listening");
        }

        let monitor = LivenessMonitor::new(
            self.lease.clone(),
            self.config.dispatcher_addr.clone(),
            self.config.lease_check_interval(),
            self.config.request_timeout(),
        );
        let monitor_shutdown = shutdown.clone();
        let monitor_handle = tokio::spawn(async move { monitor.run(monitor_shutdown).await });

        let handler = Arc::new(RunnerHandler {
            gate: self.gate.clone(),
            lease: self.lease.clone(),
            executor: self.executor.clone(),
            dispatcher_addr: self.config.dispatcher_addr.clone(),
            request_timeout: self.config.request_timeout(),
            read_timeout: self.config.read_timeout(),
            result_retry: self.config.result_retry(),
            shutdown: shutdown.clone(),
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _peer)) => {
                        let handler = handler.clone();
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
        tracing::info!("Runner shut down");

        match monitor_handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Liveness monitor task failed");
                Ok(())
            }
        }
    }
}

struct RunnerHandler {
    gate: ExecutionGate,
    lease: Arc<Lease>,
    executor: Arc<dyn TestExecutor>,
    dispatcher_addr: String,
    request_timeout: Duration,
    read_timeout: Duration,
    result_retry: Duration,
    shutdown: CancellationToken,
}

impl RunnerHandler {
    async fn handle_connection(&self, stream: TcpStream) {
        let mut framed = Framed::new(stream, RequestCodec);

        let Ok(next) = tokio::time::timeout(self.read_timeout, framed.next()).await else {
            tracing::debug!(
                timeout_ms = self.read_timeout.as_millis() as u64,
                "No complete request before the read deadline"
            );
            return;
        };

        let request = match next {
            Some(Ok(request)) => request,
            Some(Err(ProtocolError::Io(e))) => {
                tracing::debug!(error = %e, "Connection failed before a request arrived");
                return;
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Invalid command");
                let _ = framed.send(Response::InvalidCommand).await;
                return;
            }
            None => return,
        };

        let response = match request {
            Request::Ping => {
                self.lease.renew();
                Response::Pong
            }
            Request::Status => Response::Ok,
            Request::RunTest { commit_id } => {
                let Some(guard) = self.gate.try_acquire() else {
                    tracing::debug!(commit_id, "Busy, refusing runtest");
                    let _ = framed.send(Response::Busy).await;
                    return;
                };

                if let Err(e) = framed.send(Response::Ok).await {
                    tracing::warn!(commit_id, error = %e, "Could not acknowledge runtest");
                    return;
                }
                // close the connection before the (long) test run
                drop(framed);
                self.run_and_report(commit_id, guard).await;
                return;
            }
            other => {
                tracing::debug!(command = other.command(), "Command not served by runners");
                Response::InvalidCommand
            }
        };

        if let Err(e) = framed.send(response).await {
            tracing::debug!(error = %e, "Failed to send response");
        }
    }

    /// Run the suite, then push the report until the dispatcher takes it.
    ///
    /// A dispatcher that is down or answers something unexpected is retried
    /// every `result_retry`. `Invalid command` is a permanent refusal.
    async fn run_and_report(&self, commit_id: String, guard: GateGuard) {
        let report = self.executor.run_tests(&commit_id).await;
        drop(guard);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let request = Request::Result {
                commit_id: commit_id.clone(),
                payload: report.clone(),
            };
            match communicate(&self.dispatcher_addr, request, self.request_timeout).await {
                Ok(Response::Ok) => {
                    tracing::info!(commit_id, attempt, "Result delivered");
                    return;
                }
                Ok(Response::InvalidCommand) => {
                    tracing::error!(commit_id, "Dispatcher rejected result");
                    return;
                }
                Ok(other) => {
                    tracing::warn!(commit_id, attempt, response = %other, "Result not accepted");
                }
                Err(e) => {
                    tracing::warn!(commit_id, attempt, error = %e, "Could not deliver result");
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::error!(commit_id, attempt, "Shutting down with result undelivered");
                    return;
                }
                _ = tokio::time::sleep(self.result_retry) => {}
            }
        }
    }
}
