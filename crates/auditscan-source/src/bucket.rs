use std::io;

use futures::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::ACCEPT_ENCODING;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info};

use crate::{ObjectReader, SourceError};

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_BUCKET: &str = "kubernetes-jenkins";

/// Reads objects from a publicly readable bucket over HTTPS, without credentials
#[derive(Clone, Debug)]
pub struct BucketSource {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
}

impl BucketSource {
    pub fn new(endpoint: &str, bucket: &str) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("auditscan/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
        })
    }

    /// Build the download URL for an object
    pub fn object_url(&self, object_path: &str) -> Result<String, SourceError> {
        let path = object_path.trim_start_matches('/');
        if path.is_empty() || path.ends_with('/') {
            return Err(SourceError::InvalidPath(object_path.to_string()));
        }
        Ok(format!("{}/{}/{}", self.endpoint, self.bucket, path))
    }

    /// Start downloading an object.
    ///
    /// The stored bytes are requested as-is (no transcoding), so gzip objects
    /// arrive compressed. The body is streamed; the returned reader blocks and
    /// must only be read from a blocking thread.
    pub async fn open(&self, object_path: &str) -> Result<ObjectReader, SourceError> {
        let url = self.object_url(object_path)?;
        debug!(url = %url, "requesting object");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT_ENCODING, "gzip")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound(object_path.to_string())),
            status => {
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    path: object_path.to_string(),
                });
            }
        }

        info!(
            object = object_path,
            size = ?response.content_length(),
            "downloading object"
        );

        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(SyncIoBridge::new(StreamReader::new(body))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        let source = BucketSource::new("https://storage.example.com/", "/logs-bucket/").unwrap();
        assert_eq!(
            source.object_url("/pr-logs/123/kube-apiserver-audit.log.gz").unwrap(),
            "https://storage.example.com/logs-bucket/pr-logs/123/kube-apiserver-audit.log.gz"
        );
    }

    #[test]
    fn test_object_url_rejects_directories() {
        let source = BucketSource::new(DEFAULT_ENDPOINT, DEFAULT_BUCKET).unwrap();
        assert!(matches!(source.object_url(""), Err(SourceError::InvalidPath(_))));
        assert!(matches!(source.object_url("logs/"), Err(SourceError::InvalidPath(_))));
    }
}
