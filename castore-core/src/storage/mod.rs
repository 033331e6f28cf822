//! Storage backends for Castore
//!
//! Each backend wraps one concrete storage system behind the minimal surface
//! the artifact store needs. Backends are the only place where storage-native
//! errors are inspected; everything they return is already an
//! [`ArtifactError`](crate::ArtifactError).

pub mod fs_backend;
pub mod memory_backend;
pub mod object_backend;

pub use fs_backend::FsBackend;
pub use memory_backend::{MemoryBackend, MemoryBackendStats};
pub use object_backend::ObjectStoreBackend;

use crate::{ArtifactError, ArtifactStream, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The storage systems an [`ArtifactStore`](crate::ArtifactStore) can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gcs,
    S3,
    Local,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Gcs => "gcs",
            BackendKind::S3 => "s3",
            BackendKind::Local => "local",
            BackendKind::Memory => "memory",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gcs" => Ok(BackendKind::Gcs),
            "s3" => Ok(BackendKind::S3),
            "local" => Ok(BackendKind::Local),
            "memory" => Ok(BackendKind::Memory),
            "" => Err(ArtifactError::Config(
                "store backend cannot be empty".to_string(),
            )),
            other => Err(ArtifactError::Config(format!(
                "unsupported store backend: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyed object storage addressed by artifact hash.
///
/// Implementations must be safe to share between concurrent callers without
/// external locking.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Metadata-only existence check. Must not transfer the object content.
    async fn head(&self, hash: &str) -> Result<()>;

    /// Opens the object for streaming reads.
    async fn open_read(&self, hash: &str) -> Result<ArtifactStream>;

    /// Opens a sink whose content becomes visible under `hash` only on commit.
    async fn open_write(&self, hash: &str) -> Result<Box<dyn ArtifactSink>>;

    /// Releases the backend connection.
    async fn close(&self) -> Result<()>;
}

/// Write handle returned by [`Backend::open_write`].
///
/// A sink that is aborted or dropped without a commit must leave no object
/// behind.
#[async_trait]
pub trait ArtifactSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}

pub type DynBackend = std::sync::Arc<dyn Backend>;
