use std::fs::File;
use std::path::PathBuf;

use tracing::debug;

use crate::SourceError;

/// Serves objects from a local directory of previously downloaded logs.
///
/// Only the last segment of the object path is used; `foo.log.gz` is looked
/// up as `foo.log.gz` first and `foo.log` second.
#[derive(Clone, Debug)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Find the file backing `object_path`
    pub fn resolve(&self, object_path: &str) -> Result<PathBuf, SourceError> {
        let name = object_path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| SourceError::InvalidPath(object_path.to_string()))?;

        let mut candidates = vec![self.root.join(name)];
        if let Some(stem) = name.strip_suffix(".gz") {
            candidates.push(self.root.join(stem));
        }

        candidates
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| SourceError::NotFound(object_path.to_string()))
    }

    pub async fn open(&self, object_path: &str) -> Result<File, SourceError> {
        let path = self.resolve(object_path)?;
        debug!(path = %path.display(), "opening local object");
        let file = tokio::fs::File::open(&path).await?;
        Ok(file.into_std().await)
    }
}
