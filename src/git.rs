use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{CiError, Result};

/// Run `git <args>` inside `repo` and return its stdout.
pub async fn git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| CiError::Git(format!("failed to spawn git {}: {}", args.join(" "), e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(CiError::Git(format!(
            "git {} exited with {:?}: {}",
            args.join(" "),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Run a git step whose failure should not abort the caller: the error is
/// logged and `None` returned.
pub async fn git_or_log(repo: &Path, args: &[&str], what: &str) -> Option<String> {
    match git(repo, args).await {
        Ok(stdout) => Some(stdout),
        Err(e) => {
            tracing::error!(repo = %repo.display(), error = %e, "{}", what);
            None
        }
    }
}

/// Commit id currently checked out in `repo`.
pub async fn head_commit(repo: &Path) -> Result<String> {
    let stdout = git(repo, &["log", "-n1", "--format=%H"]).await?;
    let commit = stdout.trim();
    if commit.is_empty() {
        return Err(CiError::Git("repository has no commits".to_string()));
    }
    Ok(commit.to_string())
}
