use super::{ArtifactSink, Backend, BackendKind};
use crate::{ArtifactError, ArtifactStream, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// In-process backend keeping every artifact in a map.
///
/// Counts the traffic it sees so callers can assert how many bytes a store
/// actually transferred and whether readers were released.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    counters: Arc<Counters>,
    chunk_size: Option<usize>,
}

#[derive(Default)]
struct Counters {
    heads: AtomicU64,
    reads_opened: AtomicU64,
    open_readers: AtomicU64,
    writes_opened: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    bytes_written: AtomicU64,
    closes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBackendStats {
    pub heads: u64,
    pub reads_opened: u64,
    pub open_readers: u64,
    pub writes_opened: u64,
    pub commits: u64,
    pub aborts: u64,
    pub bytes_written: u64,
    pub closes: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the chunks yielded by `open_read` streams.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// Places an object directly, bypassing the write path and its counters.
    pub async fn insert(&self, hash: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().await.insert(hash.into(), data.into());
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub fn stats(&self) -> MemoryBackendStats {
        let counters = &self.counters;
        MemoryBackendStats {
            heads: counters.heads.load(Ordering::SeqCst),
            reads_opened: counters.reads_opened.load(Ordering::SeqCst),
            open_readers: counters.open_readers.load(Ordering::SeqCst),
            writes_opened: counters.writes_opened.load(Ordering::SeqCst),
            commits: counters.commits.load(Ordering::SeqCst),
            aborts: counters.aborts.load(Ordering::SeqCst),
            bytes_written: counters.bytes_written.load(Ordering::SeqCst),
            closes: counters.closes.load(Ordering::SeqCst),
        }
    }

    fn validate_hash(hash: &str) -> Result<()> {
        if hash.is_empty() {
            return Err(ArtifactError::InvalidHash(
                "artifact hash cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn head(&self, hash: &str) -> Result<()> {
        Self::validate_hash(hash)?;
        self.counters.heads.fetch_add(1, Ordering::SeqCst);

        if self.objects.read().await.contains_key(hash) {
            Ok(())
        } else {
            Err(ArtifactError::NotFound(hash.to_string()))
        }
    }

    async fn open_read(&self, hash: &str) -> Result<ArtifactStream> {
        Self::validate_hash(hash)?;

        let data = self
            .objects
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(hash.to_string()))?;

        self.counters.reads_opened.fetch_add(1, Ordering::SeqCst);
        let guard = ReaderGuard::new(self.counters.clone());
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);

        let stream = stream::unfold((data, guard), move |(mut data, guard)| async move {
            if data.is_empty() {
                return None;
            }
            let chunk = data.split_to(chunk_size.min(data.len()));
            Some((Ok(chunk), (data, guard)))
        });

        Ok(stream.boxed())
    }

    async fn open_write(&self, hash: &str) -> Result<Box<dyn ArtifactSink>> {
        Self::validate_hash(hash)?;
        self.counters.writes_opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySink {
            hash: hash.to_string(),
            buf: BytesMut::new(),
            objects: self.objects.clone(),
            counters: self.counters.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks one open reader; released when the stream holding it is dropped.
struct ReaderGuard {
    counters: Arc<Counters>,
}

impl ReaderGuard {
    fn new(counters: Arc<Counters>) -> Self {
        counters.open_readers.fetch_add(1, Ordering::SeqCst);
        Self { counters }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.counters.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemorySink {
    hash: String,
    buf: BytesMut,
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
    counters: Arc<Counters>,
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.counters
            .bytes_written
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemorySink {
            hash,
            buf,
            objects,
            counters,
        } = *self;

        // Objects are immutable: an earlier commit under the same hash wins.
        objects
            .write()
            .await
            .entry(hash)
            .or_insert_with(|| buf.freeze());
        counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect_bytes;

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::new().with_chunk_size(3);

        let mut sink = backend.open_write("abc123").await.unwrap();
        sink.write(Bytes::from_static(b"hello ")).await.unwrap();
        sink.write(Bytes::from_static(b"world")).await.unwrap();
        assert!(backend.head("abc123").await.unwrap_err().is_not_found());
        sink.commit().await.unwrap();

        backend.head("abc123").await.unwrap();
        let body = collect_bytes(backend.open_read("abc123").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"hello world"));

        let stats = backend.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.bytes_written, 11);
        assert_eq!(stats.open_readers, 0);
    }

    #[tokio::test]
    async fn test_memory_backend_abort_leaves_nothing() {
        let backend = MemoryBackend::new();

        let mut sink = backend.open_write("abc123").await.unwrap();
        sink.write(Bytes::from_static(b"partial")).await.unwrap();
        sink.abort().await.unwrap();

        assert!(backend.is_empty().await);
        assert!(backend.open_read("abc123").await.is_err());
        assert_eq!(backend.stats().aborts, 1);
    }

    #[tokio::test]
    async fn test_memory_backend_rejects_empty_hash() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.head("").await,
            Err(ArtifactError::InvalidHash(_))
        ));
    }
}
