//! Object sources for auditscan
//!
//! This crate opens log objects from a public bucket or a local directory and
//! wraps them in decompression and duration tracking.

mod bucket;
mod decompress;
mod local;
mod tracking;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use auditscan_types::DurationMap;

pub use bucket::{BucketSource, DEFAULT_BUCKET, DEFAULT_ENDPOINT};
pub use decompress::{Compression, Decoder};
pub use local::LocalSource;
pub use tracking::TrackingReader;

/// A readable object stream, ready to hand to the scan pipeline
pub type ObjectReader = Box<dyn Read + Send>;

/// Errors raised while opening an object, before any line is scanned
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid object path '{0}'")]
    InvalidPath(String),

    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{path}' request failed with status {status}")]
    Status { status: u16, path: String },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// `[source]` section of the config file
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Object store base URL
    pub endpoint: String,

    /// Bucket holding the logs
    pub bucket: String,

    /// Read objects from this directory instead of the bucket
    pub local_root: Option<PathBuf>,

    pub compression: Compression,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            local_root: None,
            compression: Compression::Auto,
        }
    }
}

/// Where objects come from
#[derive(Clone, Debug)]
pub enum ObjectStore {
    Bucket(BucketSource),
    Local(LocalSource),
}

impl ObjectStore {
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(match &config.local_root {
            Some(root) => Self::Local(LocalSource::new(root)),
            None => Self::Bucket(BucketSource::new(&config.endpoint, &config.bucket)?),
        })
    }

    /// Open an object and wrap it for scanning.
    ///
    /// With `durations`, reads are timed under `download` and `decompress`.
    pub async fn open(
        &self,
        object_path: &str,
        compression: Compression,
        durations: Option<Arc<DurationMap>>,
    ) -> Result<ObjectReader, SourceError> {
        let raw: ObjectReader = match self {
            Self::Bucket(bucket) => bucket.open(object_path).await?,
            Self::Local(local) => Box::new(local.open(object_path).await?),
        };

        Ok(match durations {
            Some(durations) => {
                let raw = TrackingReader::new(raw, "download", Arc::clone(&durations));
                Box::new(TrackingReader::new(
                    Decoder::new(raw, compression),
                    "decompress",
                    durations,
                ))
            }
            None => Box::new(Decoder::new(raw, compression)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[tokio::test]
    async fn test_open_local_gzip_object_with_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"one\ntwo\n").unwrap();
        std::fs::write(dir.path().join("audit.log.gz"), encoder.finish().unwrap()).unwrap();

        let config = SourceConfig {
            local_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let store = ObjectStore::from_config(&config).unwrap();
        let durations = Arc::new(DurationMap::new());

        let mut reader = store
            .open("bucket/dir/audit.log.gz", Compression::Auto, Some(Arc::clone(&durations)))
            .await
            .unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();

        assert_eq!(out, "one\ntwo\n");
        assert!(durations.get("download").is_some());
        assert!(durations.get("decompress").is_some());
    }

    #[tokio::test]
    async fn test_open_missing_local_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::Local(LocalSource::new(dir.path()));
        let err = store.open("nope.log", Compression::Auto, None).await.err().unwrap();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_default_config_uses_bucket() {
        let store = ObjectStore::from_config(&SourceConfig::default()).unwrap();
        assert!(matches!(store, ObjectStore::Bucket(_)));
    }
}
