use crate::storage::{ArtifactSink, BackendKind, DynBackend};
use crate::{ArtifactError, ArtifactStream, Result, WriteError};
use futures_util::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Content-addressed artifact store over a single backend.
///
/// Artifacts are immutable byte sequences addressed by a caller-supplied
/// hash. The store never checks that the bytes match the hash; equal hashes
/// are trusted to mean equal content, which is what makes skipping a write
/// for an existing hash correct.
///
/// Cloning is cheap and every clone shares the same backend connection.
/// Operations are cancelled by dropping their future (for example through
/// `tokio::time::timeout`); a cancelled `store` never leaves a partial
/// artifact behind.
#[derive(Clone)]
pub struct ArtifactStore {
    backend: DynBackend,
    closed: Arc<AtomicBool>,
}

impl ArtifactStore {
    pub fn new(backend: DynBackend) -> Self {
        Self {
            backend,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Checks that an artifact exists without transferring its content.
    pub async fn contains(&self, hash: &str) -> Result<()> {
        self.ensure_usable(hash)?;
        self.backend.head(hash).await
    }

    /// Opens the artifact for streaming. Dropping the returned stream,
    /// whether or not it was read to the end, releases the reader.
    pub async fn load(&self, hash: &str) -> Result<ArtifactStream> {
        self.ensure_usable(hash)?;
        self.backend.open_read(hash).await
    }

    /// Stores `body` under `hash` unless an artifact with that hash exists.
    ///
    /// Existence is decided by opening the artifact for reading; when that
    /// succeeds the reader is dropped and `body` is left unread. Otherwise the
    /// body is copied into a backend sink that is committed on success and
    /// aborted on a transfer failure. A failure of either step is reported in
    /// one [`WriteError`] carrying both causes. A sink that cannot be opened
    /// is a transfer failure with no close cause.
    ///
    /// Two concurrent calls for the same hash may both find it absent and both
    /// upload. This race is accepted: identical hashes carry identical bytes,
    /// so whichever upload lands last leaves the same content.
    pub async fn store(&self, hash: &str, body: ArtifactStream) -> Result<()> {
        self.ensure_usable(hash)?;

        match self.backend.open_read(hash).await {
            Ok(existing) => {
                drop(existing);
                tracing::debug!("Artifact {} already stored, skipping upload", hash);
                return Ok(());
            }
            Err(error) if error.is_not_found() => {}
            Err(error) => {
                tracing::debug!(
                    "Existence check for artifact {} failed, uploading anyway: {}",
                    hash,
                    error
                );
            }
        }

        let mut sink = match self.backend.open_write(hash).await {
            Ok(sink) => sink,
            Err(error) => {
                return Err(ArtifactError::Write(WriteError {
                    hash: hash.to_string(),
                    transfer: Some(Box::new(error)),
                    close: None,
                }));
            }
        };
        let (transfer, written) = copy_into(body, sink.as_mut()).await;

        let close = if transfer.is_ok() {
            sink.commit().await
        } else {
            sink.abort().await
        };

        if let Some(error) = WriteError::aggregate(hash, transfer, close) {
            return Err(ArtifactError::Write(error));
        }

        tracing::debug!("Stored artifact {} ({} bytes)", hash, written);
        Ok(())
    }

    /// Releases the backend. Later operations fail with
    /// [`ArtifactError::Closed`]; closing again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Closing {} artifact store", self.backend.kind());
        self.backend.close().await.map_err(|error| match error {
            ArtifactError::Close(message) => ArtifactError::Close(message),
            other => ArtifactError::Close(other.to_string()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self, hash: &str) -> Result<()> {
        if self.is_closed() {
            return Err(ArtifactError::Closed);
        }
        if hash.is_empty() {
            return Err(ArtifactError::InvalidHash(
                "artifact hash cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Copies every chunk of `body` into `sink`, returning the outcome and the
/// number of bytes handed to the sink.
async fn copy_into(mut body: ArtifactStream, sink: &mut dyn ArtifactSink) -> (Result<()>, u64) {
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => return (Err(error), written),
        };
        if chunk.is_empty() {
            continue;
        }

        let len = chunk.len() as u64;
        if let Err(error) = sink.write(chunk).await {
            return (Err(error), written);
        }
        written += len;
    }
    (Ok(()), written)
}
