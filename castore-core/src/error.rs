use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact hash: {0}")]
    InvalidHash(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Write(WriteError),

    #[error("failed to close artifact store: {0}")]
    Close(String),

    #[error("artifact store is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ArtifactError {
    /// True when the artifact is absent, as opposed to any other failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArtifactError::NotFound(_))
    }

    /// The hash carried by a `NotFound` error.
    pub fn not_found_hash(&self) -> Option<&str> {
        match self {
            ArtifactError::NotFound(hash) => Some(hash),
            _ => None,
        }
    }
}

/// Failure on the write path of `ArtifactStore::store`.
///
/// Holds the transfer failure and the failure to commit or abort the write
/// sink independently, so neither hides the other.
#[derive(Debug)]
pub struct WriteError {
    pub hash: String,
    pub transfer: Option<Box<ArtifactError>>,
    pub close: Option<Box<ArtifactError>>,
}

impl WriteError {
    /// Combines the two outcomes of a write. Returns `None` when both succeeded.
    pub fn aggregate(
        hash: &str,
        transfer: std::result::Result<(), ArtifactError>,
        close: std::result::Result<(), ArtifactError>,
    ) -> Option<Self> {
        let transfer = transfer.err().map(Box::new);
        let close = close.err().map(Box::new);
        if transfer.is_none() && close.is_none() {
            return None;
        }

        Some(Self {
            hash: hash.to_string(),
            transfer,
            close,
        })
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to write artifact {}", self.hash)?;
        if let Some(transfer) = &self.transfer {
            write!(f, "; transfer: {}", transfer)?;
        }
        if let Some(close) = &self.close {
            write!(f, "; close: {}", close)?;
        }
        Ok(())
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.transfer
            .as_deref()
            .or(self.close.as_deref())
            .map(|error| error as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;
