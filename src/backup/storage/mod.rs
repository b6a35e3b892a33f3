//! Object storage seen as a flat key/blob store.

#[cfg(test)]
pub mod memory;
pub mod s3;

use crate::backup::result_error::result::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// A remote object as returned by a listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    /// `None` when the store did not report a usable timestamp
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Streams the file at `path` to `key`.
    async fn put_file(&self, path: &Path, key: &str) -> Result<()>;

    /// Lists every object whose key starts with `prefix`, across all pages.
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;

    async fn delete(&self, key: &str) -> Result<()>;
}
