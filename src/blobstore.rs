//! The artifact-store capability the hub consumes: existence checks, puts,
//! presigned GET/PUT URLs, and canonical URLs over a logical path space.
//!
//! Packages are content-addressed and immutable after upload, so puts are
//! idempotent and no locking is needed. The hub ships two backends: an
//! anonymous HTTP store (presigned URL == canonical URL) and an in-process
//! memory store for tests. Object-store backends (`gs://`, `s3://`) are
//! deployed as separate services and rejected here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("blob {0:?} not found")]
    NotFound(String),
    #[error("invalid storage url: {0}")]
    InvalidUrl(String),
    #[error("unsupported storage scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("http request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {status} for {path:?}")]
    HttpStatus { status: u16, path: String },
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Succeeds iff a blob exists at `path`.
    async fn exists(&self, path: &str) -> Result<(), BlobStoreError>;
    /// Stores `data` at `path`, replacing any previous content.
    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobStoreError>;
    /// Time-limited URL for a direct download of `path`.
    async fn presign_get(&self, path: &str, validity: Duration) -> Result<String, BlobStoreError>;
    /// Time-limited URL for a direct upload to `path`.
    async fn presign_put(&self, path: &str, validity: Duration) -> Result<String, BlobStoreError>;
    /// Stable, scheme-qualified URL of `path`.
    fn canonical_url(&self, path: &str) -> String;
}

/// Builds a backend from the configured prefix URL.
pub fn from_url(prefix: &str) -> Result<Arc<dyn BlobStore>, BlobStoreError> {
    let parsed =
        Url::parse(prefix).map_err(|e| BlobStoreError::InvalidUrl(format!("{prefix}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(Arc::new(HttpBlobStore::new(prefix)?)),
        "mem" => Ok(Arc::new(MemoryBlobStore::new(prefix)?)),
        other => Err(BlobStoreError::UnsupportedScheme(other.to_string())),
    }
}

fn require_trailing_slash(prefix: &str) -> Result<(), BlobStoreError> {
    if !prefix.ends_with('/') {
        return Err(BlobStoreError::InvalidUrl(format!(
            "{prefix}: prefix must end with a slash"
        )));
    }
    Ok(())
}

/// Anonymous HTTP store. There is no signing: presigned URLs are the
/// canonical URLs, and the server behind the prefix accepts plain GET/PUT.
pub struct HttpBlobStore {
    base: Url,
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(prefix: &str) -> Result<Self, BlobStoreError> {
        require_trailing_slash(prefix)?;
        let base =
            Url::parse(prefix).map_err(|e| BlobStoreError::InvalidUrl(format!("{prefix}: {e}")))?;
        Ok(Self {
            base,
            client: reqwest::Client::new(),
        })
    }

    fn url_for(&self, path: &str) -> Result<Url, BlobStoreError> {
        self.base
            .join(path)
            .map_err(|e| BlobStoreError::InvalidUrl(format!("{path}: {e}")))
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn exists(&self, path: &str) -> Result<(), BlobStoreError> {
        let res = self.client.head(self.url_for(path)?).send().await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobStoreError::NotFound(path.to_string()));
        }
        if !res.status().is_success() {
            return Err(BlobStoreError::HttpStatus {
                status: res.status().as_u16(),
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobStoreError> {
        let res = self
            .client
            .put(self.url_for(path)?)
            .body(data)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(BlobStoreError::HttpStatus {
                status: res.status().as_u16(),
                path: path.to_string(),
            });
        }
        Ok(())
    }

    async fn presign_get(&self, path: &str, _validity: Duration) -> Result<String, BlobStoreError> {
        Ok(self.canonical_url(path))
    }

    async fn presign_put(&self, path: &str, _validity: Duration) -> Result<String, BlobStoreError> {
        Ok(self.canonical_url(path))
    }

    fn canonical_url(&self, path: &str) -> String {
        self.base
            .join(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.base, path))
    }
}

/// In-process store for tests and local development.
pub struct MemoryBlobStore {
    prefix: String,
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new(prefix: &str) -> Result<Self, BlobStoreError> {
        require_trailing_slash(prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
            blobs: Mutex::new(HashMap::new()),
        })
    }

    /// Test hook: raw content of a stored blob.
    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.blobs.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, path: &str) -> Result<(), BlobStoreError> {
        if self.blobs.lock().unwrap().contains_key(path) {
            Ok(())
        } else {
            Err(BlobStoreError::NotFound(path.to_string()))
        }
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<(), BlobStoreError> {
        self.blobs.lock().unwrap().insert(path.to_string(), data);
        Ok(())
    }

    async fn presign_get(&self, path: &str, _validity: Duration) -> Result<String, BlobStoreError> {
        Ok(self.canonical_url(path))
    }

    async fn presign_put(&self, path: &str, _validity: Duration) -> Result<String, BlobStoreError> {
        Ok(self.canonical_url(path))
    }

    fn canonical_url(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}
