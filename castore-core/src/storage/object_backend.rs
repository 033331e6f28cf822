use super::{ArtifactSink, Backend, BackendKind};
use crate::config::ResolvedCredentials;
use crate::{ArtifactError, ArtifactStream, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::gcp::{GcpCredential, GoogleCloudStorageBuilder};
use object_store::path::Path;
use object_store::{ObjectStore, StaticCredentialProvider};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;

/// Backend over any [`ObjectStore`] bucket, keyed directly by artifact hash.
///
/// Uploads go through [`BufWriter`]: bodies below its capacity are sent as a
/// single put on commit, larger ones as a multipart upload completed on
/// commit. An aborted or dropped writer therefore never produces a visible
/// object.
///
/// `close` only marks the backend closed; the HTTP connection pool is
/// released when the last handle is dropped. Closing twice is harmless.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    kind: BackendKind,
    closed: AtomicBool,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, kind: BackendKind) -> Self {
        Self {
            store,
            kind,
            closed: AtomicBool::new(false),
        }
    }

    /// Google Cloud Storage bucket. Anonymous credentials allow reads of
    /// public buckets only.
    pub fn gcs(bucket: &str, credentials: &ResolvedCredentials) -> Result<Self> {
        let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(bucket);

        builder = match credentials {
            ResolvedCredentials::ApplicationCredentials(path) => {
                builder.with_application_credentials(path.to_string_lossy())
            }
            ResolvedCredentials::ServiceAccount(path) => {
                builder.with_service_account_path(path.to_string_lossy())
            }
            ResolvedCredentials::Environment => builder,
            // Requests carrying an empty bearer token are sent unauthenticated.
            ResolvedCredentials::Anonymous => builder.with_credentials(Arc::new(
                StaticCredentialProvider::new(GcpCredential {
                    bearer: String::new(),
                }),
            )),
        };

        let store = builder.build().map_err(|error| {
            ArtifactError::Config(format!("failed to create gcs client: {}", error))
        })?;

        tracing::info!(
            "Created gcs artifact backend for bucket {} (anonymous: {})",
            bucket,
            credentials.is_anonymous()
        );
        Ok(Self::new(Arc::new(store), BackendKind::Gcs))
    }

    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        credentials: &ResolvedCredentials,
    ) -> Result<Self> {
        let mut builder = match credentials {
            ResolvedCredentials::Anonymous => {
                AmazonS3Builder::new().with_skip_signature(true)
            }
            _ => AmazonS3Builder::from_env(),
        }
        .with_bucket_name(bucket);

        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build().map_err(|error| {
            ArtifactError::Config(format!("failed to create s3 client: {}", error))
        })?;

        tracing::info!(
            "Created s3 artifact backend for bucket {} (anonymous: {})",
            bucket,
            credentials.is_anonymous()
        );
        Ok(Self::new(Arc::new(store), BackendKind::S3))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ArtifactError::Closed);
        }
        Ok(())
    }
}

/// The hash is used verbatim as the object key; it must be a valid key.
fn object_path(hash: &str) -> Result<Path> {
    if hash.is_empty() {
        return Err(ArtifactError::InvalidHash(
            "artifact hash cannot be empty".to_string(),
        ));
    }

    let path = Path::parse(hash)
        .map_err(|error| ArtifactError::InvalidHash(format!("{}: {}", hash, error)))?;
    if path.as_ref() != hash {
        return Err(ArtifactError::InvalidHash(format!(
            "{}: not a canonical object key",
            hash
        )));
    }
    Ok(path)
}

fn classify(hash: &str, error: object_store::Error) -> ArtifactError {
    match error {
        object_store::Error::NotFound { .. } => ArtifactError::NotFound(hash.to_string()),
        other => ArtifactError::Backend(other.to_string()),
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn head(&self, hash: &str) -> Result<()> {
        self.ensure_open()?;
        let path = object_path(hash)?;
        self.store
            .head(&path)
            .await
            .map_err(|error| classify(hash, error))?;
        Ok(())
    }

    async fn open_read(&self, hash: &str) -> Result<ArtifactStream> {
        self.ensure_open()?;
        let path = object_path(hash)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|error| classify(hash, error))?;

        let hash = hash.to_string();
        Ok(result
            .into_stream()
            .map_err(move |error| classify(&hash, error))
            .boxed())
    }

    async fn open_write(&self, hash: &str) -> Result<Box<dyn ArtifactSink>> {
        self.ensure_open()?;
        let path = object_path(hash)?;
        Ok(Box::new(ObjectSink {
            writer: BufWriter::new(self.store.clone(), path),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ObjectSink {
    writer: BufWriter,
}

#[async_trait]
impl ArtifactSink for ObjectSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.writer
            .put(chunk)
            .await
            .map_err(|error| ArtifactError::Backend(error.to_string()))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|error| ArtifactError::Backend(error.to_string()))
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.writer
            .abort()
            .await
            .map_err(|error| ArtifactError::Backend(error.to_string()))
    }
}
