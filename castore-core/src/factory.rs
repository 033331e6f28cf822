use crate::config::CredentialsSource;
use crate::storage::{BackendKind, DynBackend, FsBackend, MemoryBackend, ObjectStoreBackend};
use crate::{ArtifactError, ArtifactStore, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ArtifactStoreBuilder {
    backend: Option<String>,
    location: Option<String>,
    credentials: CredentialsSource,
    region: Option<String>,
    endpoint: Option<String>,
    env_lookup: Option<fn(&str) -> Option<String>>,
}

impl ArtifactStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Bucket name for object stores, root directory for the local backend.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn credentials(mut self, credentials: CredentialsSource) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Replaces the process environment when resolving credentials.
    pub fn env_lookup(mut self, lookup: fn(&str) -> Option<String>) -> Self {
        self.env_lookup = Some(lookup);
        self
    }

    fn resolve_backend(&self) -> Result<BackendKind> {
        BackendKind::parse(self.backend.as_deref().unwrap_or_default())
    }

    fn resolve_location(&self, kind: BackendKind) -> Result<String> {
        let location = self
            .location
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string();
        if location.is_empty() {
            let what = match kind {
                BackendKind::Local => "path",
                _ => "bucket",
            };
            return Err(ArtifactError::Config(format!(
                "{} is required for {} backend",
                what, kind
            )));
        }

        Ok(location)
    }

    pub async fn build(&self) -> Result<ArtifactStore> {
        let kind = self.resolve_backend()?;
        let credentials = match self.env_lookup {
            Some(lookup) => self.credentials.resolve_with(kind, lookup)?,
            None => self.credentials.resolve(kind)?,
        };

        let backend: DynBackend = match kind {
            BackendKind::Gcs => {
                let bucket = self.resolve_location(kind)?;
                Arc::new(ObjectStoreBackend::gcs(&bucket, &credentials)?)
            }
            BackendKind::S3 => {
                let bucket = self.resolve_location(kind)?;
                Arc::new(ObjectStoreBackend::s3(
                    &bucket,
                    self.region.as_deref(),
                    self.endpoint.as_deref(),
                    &credentials,
                )?)
            }
            BackendKind::Local => {
                let path = self.resolve_location(kind)?;
                let backend = FsBackend::new(&path).map_err(|error| {
                    ArtifactError::Config(format!(
                        "failed to initialize local store at {}: {}",
                        path, error
                    ))
                })?;
                tracing::info!("Created local artifact backend at {}", path);
                Arc::new(backend)
            }
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
        };

        Ok(ArtifactStore::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collect_bytes, stream_from_bytes};

    fn empty_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn test_build_memory_store() {
        let store = ArtifactStoreBuilder::new()
            .backend("Memory")
            .build()
            .await
            .unwrap();
        assert_eq!(store.backend_kind(), BackendKind::Memory);
    }

    #[tokio::test]
    async fn test_build_local_store_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("artifacts");

        let store = ArtifactStoreBuilder::new()
            .backend("local")
            .location(root.to_string_lossy())
            .build()
            .await
            .unwrap();
        assert!(root.is_dir());

        store
            .store("abc123", stream_from_bytes("hello world"))
            .await
            .unwrap();
        let body = collect_bytes(store.load("abc123").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_build_gcs_without_credentials_is_anonymous() {
        let store = ArtifactStoreBuilder::new()
            .backend("gcs")
            .location("public-artifacts")
            .env_lookup(empty_env)
            .build()
            .await
            .unwrap();
        assert_eq!(store.backend_kind(), BackendKind::Gcs);
    }

    #[tokio::test]
    async fn test_build_s3_without_credentials_is_anonymous() {
        let store = ArtifactStoreBuilder::new()
            .backend("s3")
            .location("public-artifacts")
            .region("us-east-1")
            .env_lookup(empty_env)
            .build()
            .await
            .unwrap();
        assert_eq!(store.backend_kind(), BackendKind::S3);
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected() {
        let error = ArtifactStoreBuilder::new()
            .backend("ftp")
            .location("somewhere")
            .build()
            .await
            .err()
            .unwrap();
        assert!(error.to_string().contains("unsupported store backend: ftp"));

        let error = ArtifactStoreBuilder::new().build().await.err().unwrap();
        assert!(matches!(error, ArtifactError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_location_rejected() {
        let error = ArtifactStoreBuilder::new()
            .backend("gcs")
            .env_lookup(empty_env)
            .build()
            .await
            .err()
            .unwrap();
        assert!(error.to_string().contains("bucket is required for gcs backend"));
    }
}
