use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::git::git_or_log;

/// Runs a test suite for a commit and produces its textual report.
///
/// Failures are part of the report, never an error: the dispatcher only
/// stores whatever text comes back.
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn run_tests(&self, commit_id: &str) -> String;
}

/// Checks the commit out in a local clone and runs a shell command there.
#[derive(Debug, Clone)]
pub struct ShellTestExecutor {
    repo: PathBuf,
    test_command: String,
}

impl ShellTestExecutor {
    pub fn new(repo: impl Into<PathBuf>, test_command: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            test_command: test_command.into(),
        }
    }

    /// Bring the clone to `commit_id`. Each step is best effort.
    async fn checkout(&self, commit_id: &str) {
        if !self.repo.join(".git").exists() {
            tracing::warn!(repo = %self.repo.display(), "Not a git clone, skipping checkout");
            return;
        }
        git_or_log(
            &self.repo,
            &["clean", "-d", "-f", "-x"],
            "Could not clean repository",
        )
        .await;
        git_or_log(&self.repo, &["pull"], "Could not call git pull").await;
        git_or_log(
            &self.repo,
            &["reset", "--hard", commit_id],
            "Could not update to given commit hash",
        )
        .await;
    }

    fn format_report(
        commit_id: &str,
        result: Result<std::process::Output, std::io::Error>,
    ) -> String {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let exit_code = output.status.code();

                tracing::info!(
                    commit_id,
                    success = output.status.success(),
                    exit_code = ?exit_code,
                    "Tests finished"
                );

                let mut report = String::new();
                report.push_str(&stdout);
                report.push_str(&stderr);
                if !output.status.success() {
                    if !report.is_empty() && !report.ends_with('\n') {
                        report.push('\n');
                    }
                    report.push_str(&format!("Exit code: {:?}\n", exit_code));
                }
                report
            }
            Err(e) => {
                tracing::error!(commit_id, error = %e, "Test command failed to start");
                format!("Test execution failed: {}\n", e)
            }
        }
    }
}

#[async_trait]
impl TestExecutor for ShellTestExecutor {
    async fn run_tests(&self, commit_id: &str) -> String {
        tracing::info!(
            commit_id,
            command = %self.test_command,
            repo = %self.repo.display(),
            "Running tests"
        );

        self.checkout(commit_id).await;

        let result = Command::new("sh")
            .arg("-c")
            .arg(&self.test_command)
            .current_dir(&self.repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::format_report(commit_id, result)
    }
}
