use std::path::{Path, PathBuf};

use crate::error::{CiError, Result};

/// One plain-text file per commit id. Writing a commit twice keeps the
/// latest payload.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn write(&self, commit_id: &str, payload: &str) -> Result<PathBuf> {
        let path = self.path_for(commit_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, payload).await?;
        Ok(path)
    }

    pub async fn read(&self, commit_id: &str) -> Result<Option<String>> {
        let path = self.path_for(commit_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, commit_id: &str) -> Result<PathBuf> {
        validate_commit_id(commit_id)?;
        Ok(self.dir.join(commit_id))
    }
}

/// Commit ids become file names, so anything that could escape the results
/// directory is refused.
pub fn validate_commit_id(commit_id: &str) -> Result<()> {
    let invalid = commit_id.is_empty()
        || commit_id == "."
        || commit_id == ".."
        || commit_id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(CiError::InvalidCommitId(commit_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_result_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("results"));

        store.write("abc123", "first").await.unwrap();
        store.write("abc123", "second").await.unwrap();

        assert_eq!(store.read("abc123").await.unwrap().as_deref(), Some("second"));
        let files = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn missing_result_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        assert!(store.read("nothing").await.unwrap().is_none());
    }

    #[test]
    fn path_traversal_is_rejected() {
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b"] {
            assert!(validate_commit_id(bad).is_err(), "{:?} accepted", bad);
        }
        assert!(validate_commit_id("3f2a9c1").is_ok());
    }
}
