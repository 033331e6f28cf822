//! Castore Core - content-addressable artifact storage over pluggable backends
//!
//! Artifacts are immutable byte blobs addressed by a caller-supplied hash:
//! - one `ArtifactStore` front end with dedup-on-write
//! - Google Cloud Storage, S3, local filesystem and in-memory backends
//! - backend selection from configuration through `ArtifactStoreBuilder`

pub mod artifact_store;
pub mod config;
pub mod error;
pub mod factory;
pub mod hash;
pub mod storage;
pub mod stream;

pub use artifact_store::ArtifactStore;
pub use config::{CredentialsSource, ResolvedCredentials, StoreConfig};
pub use error::{ArtifactError, Result, WriteError};
pub use factory::ArtifactStoreBuilder;
pub use hash::{HASH_HEX_LEN, StreamingHasher, compute_hash};
pub use storage::{
    ArtifactSink, Backend, BackendKind, DynBackend, FsBackend, MemoryBackend, MemoryBackendStats,
    ObjectStoreBackend,
};
pub use stream::{ArtifactStream, collect_bytes, stream_from_bytes, stream_from_reader};
