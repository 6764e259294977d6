use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CiError, Result};
use crate::protocol::{communicate, Request, Response};

/// The runner's registration, valid for `ttl` after the last contact from
/// the dispatcher.
#[derive(Debug)]
pub struct Lease {
    ttl: Duration,
    last_contact: Mutex<Instant>,
}

impl Lease {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_contact: Mutex::new(Instant::now()),
        }
    }

    pub fn renew(&self) {
        let mut last_contact = self.last_contact.lock().unwrap_or_else(|e| e.into_inner());
        *last_contact = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.last_contact
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.ttl
    }
}

/// Watches the lease and shuts the runner down once the dispatcher is gone.
///
/// An expired lease is not fatal by itself: the dispatcher may simply have
/// had no reason to ping. The monitor asks the dispatcher for its status and
/// only cancels `shutdown` when that fails. A restarted dispatcher does not
/// know this runner, so the runner has to start over and register again.
pub struct LivenessMonitor {
    lease: Arc<Lease>,
    dispatcher_addr: String,
    check_interval: Duration,
    request_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(
        lease: Arc<Lease>,
        dispatcher_addr: impl Into<String>,
        check_interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            lease,
            dispatcher_addr: dispatcher_addr.into(),
            check_interval,
            request_timeout,
        }
    }

    /// Check the lease every `check_interval` until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`CiError::DispatcherLost`] after cancelling `shutdown` when
    /// the dispatcher stops answering.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.check_interval) => {}
            }

            if !self.check().await {
                shutdown.cancel();
                return Err(CiError::DispatcherLost {
                    addr: self.dispatcher_addr.clone(),
                });
            }
        }
    }

    /// Returns false when the dispatcher should be considered gone.
    pub async fn check(&self) -> bool {
        if !self.lease.is_expired() {
            return true;
        }

        let silent_ms = self.lease.elapsed().as_millis() as u64;
        match communicate(&self.dispatcher_addr, Request::Status, self.request_timeout).await {
            Ok(Response::Ok) => {
                tracing::debug!(silent_ms, "Lease expired but dispatcher is up");
                self.lease.renew();
                true
            }
            Ok(other) => {
                tracing::error!(
                    response = %other,
                    "Dispatcher is no longer functional, shutting down"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    dispatcher = %self.dispatcher_addr,
                    error = %e,
                    "Can't communicate with dispatcher, shutting down"
                );
                false
            }
        }
    }
}
