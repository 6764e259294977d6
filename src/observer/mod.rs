//! Repository observer: watches a clone for new commits and hands each one
//! to the dispatcher.

use tokio_util::sync::CancellationToken;

use crate::config::ObserverConfig;
use crate::error::Result;
use crate::git::{git_or_log, head_commit};
use crate::protocol::{expect_response, Request, Response};

pub struct RepoObserver {
    config: ObserverConfig,
}

impl RepoObserver {
    pub fn new(config: ObserverConfig) -> Self {
        Self { config }
    }

    /// Poll until shutdown.
    ///
    /// # Errors
    ///
    /// Returns as soon as the dispatcher is unreachable or refuses a commit;
    /// git failures only skip the current cycle.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            self.poll_once().await?;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        Ok(())
    }

    /// One observation cycle. Returns the commit handed to the dispatcher, if
    /// any.
    pub async fn poll_once(&self) -> Result<Option<String>> {
        let Some(commit_id) = self.update_repo().await else {
            return Ok(None);
        };

        tracing::info!(commit_id, "Found new commit");
        self.dispatch(&commit_id).await?;
        Ok(Some(commit_id))
    }

    /// Pull the clone and report the new head if it moved.
    async fn update_repo(&self) -> Option<String> {
        let repo = &self.config.repo;

        git_or_log(repo, &["reset", "--hard", "HEAD"], "Could not reset git").await?;

        let before = match head_commit(repo).await {
            Ok(commit) => commit,
            Err(e) => {
                tracing::error!(error = %e, "Could not call 'git log' on repository");
                return None;
            }
        };

        git_or_log(repo, &["pull"], "Could not pull from repository").await?;

        let after = match head_commit(repo).await {
            Ok(commit) => commit,
            Err(e) => {
                tracing::error!(error = %e, "Could not call 'git log' on repository");
                return None;
            }
        };

        (after != before).then_some(after)
    }

    async fn dispatch(&self, commit_id: &str) -> Result<()> {
        let addr = &self.config.dispatcher_addr;
        let timeout = self.config.request_timeout();

        expect_response(addr, Request::Status, Response::Ok, timeout).await?;
        expect_response(
            addr,
            Request::Dispatch {
                commit_id: commit_id.to_string(),
            },
            Response::Ok,
            timeout,
        )
        .await?;

        tracing::info!(commit_id, "Dispatched");
        Ok(())
    }
}
