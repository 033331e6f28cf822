use super::{ArtifactSink, Backend, BackendKind};
use crate::{ArtifactError, ArtifactStream, Result, stream_from_reader};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

/// FsBackend keeps one file per artifact under a root directory.
/// Artifacts live at {root}/{first two chars of hash}/{hash}.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place on commit, so a reader never observes a partial artifact.
pub struct FsBackend {
    base_path: PathBuf,
}

impl FsBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Get the base path for the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn artifact_path(&self, hash: &str) -> Result<PathBuf> {
        validate_hash(hash)?;
        Ok(self.prefix_dir(hash).join(hash))
    }

    // Two-character fan-out keeps directories small.
    fn prefix_dir(&self, hash: &str) -> PathBuf {
        let prefix: String = hash.chars().take(2).collect();
        self.base_path.join(prefix)
    }
}

/// A hash must be usable as a single file name.
fn validate_hash(hash: &str) -> Result<()> {
    if hash.is_empty() {
        return Err(ArtifactError::InvalidHash(
            "artifact hash cannot be empty".to_string(),
        ));
    }

    if hash.starts_with('.') || hash.contains(['/', '\\', '\0']) {
        return Err(ArtifactError::InvalidHash(format!(
            "artifact hash is not a valid file name: {}",
            hash
        )));
    }

    Ok(())
}

fn classify(hash: &str, error: std::io::Error) -> ArtifactError {
    if error.kind() == ErrorKind::NotFound {
        ArtifactError::NotFound(hash.to_string())
    } else {
        ArtifactError::Io(error)
    }
}

#[async_trait]
impl Backend for FsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn head(&self, hash: &str) -> Result<()> {
        let path = self.artifact_path(hash)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|error| classify(hash, error))?;

        if !meta.is_file() {
            return Err(ArtifactError::NotFound(hash.to_string()));
        }
        Ok(())
    }

    async fn open_read(&self, hash: &str) -> Result<ArtifactStream> {
        let path = self.artifact_path(hash)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|error| classify(hash, error))?;

        Ok(stream_from_reader(file))
    }

    async fn open_write(&self, hash: &str) -> Result<Box<dyn ArtifactSink>> {
        let final_path = self.artifact_path(hash)?;
        let dir = self.prefix_dir(hash);
        fs::create_dir_all(&dir).await?;

        // Unique per writer so concurrent stores of one hash never share a file.
        let temp_path = dir.join(format!(".{}.{}.tmp", hash, Ulid::new()));
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FsSink {
            file: Some(file),
            temp_path,
            final_path,
            finished: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct FsSink {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    finished: bool,
}

impl FsSink {
    fn file(&mut self) -> Result<&mut fs::File> {
        self.file.as_mut().ok_or_else(|| {
            ArtifactError::Io(std::io::Error::other("artifact sink already finished"))
        })
    }
}

#[async_trait]
impl ArtifactSink for FsSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.file()?.write_all(&chunk).await?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let file = self.file()?;
        file.flush().await?;
        file.sync_all().await?;
        drop(self.file.take());

        fs::rename(&self.temp_path, &self.final_path).await?;
        self.finished = true;

        tracing::debug!("Committed artifact file {:?}", self.final_path);
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        drop(self.file.take());
        self.finished = true;

        match fs::remove_file(&self.temp_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

impl Drop for FsSink {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.file.take());
            match std::fs::remove_file(&self.temp_path) {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(
                        "Failed to remove temporary artifact file {:?}: {}",
                        self.temp_path,
                        error
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect_bytes;

    fn temp_files(backend: &FsBackend, hash: &str) -> Vec<String> {
        let dir = backend.prefix_dir(hash);
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().to_string())
                    .filter(|name| name.ends_with(".tmp"))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_fs_backend() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(temp_dir.path()).unwrap();

        let hash = "abc123";
        assert!(backend.head(hash).await.unwrap_err().is_not_found());

        let mut sink = backend.open_write(hash).await.unwrap();
        sink.write(Bytes::from_static(b"hello world")).await.unwrap();
        sink.commit().await.unwrap();

        backend.head(hash).await.unwrap();
        assert!(temp_dir.path().join("ab").join(hash).is_file());
        assert!(temp_files(&backend, hash).is_empty());

        let body = collect_bytes(backend.open_read(hash).await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_fs_backend_abort_and_drop_remove_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(temp_dir.path()).unwrap();
        let hash = "deadbeef";

        let mut sink = backend.open_write(hash).await.unwrap();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();
        assert_eq!(temp_files(&backend, hash).len(), 1);
        sink.abort().await.unwrap();
        assert!(temp_files(&backend, hash).is_empty());

        let mut sink = backend.open_write(hash).await.unwrap();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();
        drop(sink);
        assert!(temp_files(&backend, hash).is_empty());

        assert!(backend.head(hash).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_fs_backend_drop_survives_failed_cleanup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(temp_dir.path()).unwrap();
        let hash = "deadbeef";

        let mut sink = backend.open_write(hash).await.unwrap();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();

        // Put something remove_file cannot delete where the temp file was.
        let temp_name = temp_files(&backend, hash).pop().unwrap();
        let temp_path = backend.prefix_dir(hash).join(&temp_name);
        std::fs::remove_file(&temp_path).unwrap();
        std::fs::create_dir(&temp_path).unwrap();

        drop(sink);
        assert!(temp_path.is_dir());
        assert!(backend.head(hash).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_fs_backend_rejects_path_like_hashes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(temp_dir.path()).unwrap();

        for hash in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                backend.head(hash).await,
                Err(ArtifactError::InvalidHash(_))
            ));
        }
    }
}
