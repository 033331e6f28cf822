use sha2::{Digest, Sha256};

/// Length of a hash produced by [`compute_hash`].
pub const HASH_HEX_LEN: usize = 64;

/// Compute the SHA256 hex digest used as the artifact address.
///
/// The store itself treats hashes as opaque and never calls this; it is the
/// addressing scheme the CLI and most callers use. The result is 64 lowercase
/// hex characters, which every backend accepts as a key.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Incremental form of [`compute_hash`] for streamed content.
#[derive(Default)]
pub struct StreamingHasher {
    hasher: Sha256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}
