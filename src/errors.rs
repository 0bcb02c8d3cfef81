// src/errors.rs
use thiserror::Error;

/// Failures raised by the physical snippet stores.
///
/// `QuotaExceeded` is distinguished so the storage manager can promote the
/// local store instead of failing the user's save; everything else
/// propagates unchanged.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    #[error("backup database error: {source}")]
    Database {
        #[from]
        source: rusqlite::Error,
    },
}

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded(_))
    }
}

/// Failures raised while resolving placeholder tokens.
#[derive(Debug, Error, Clone)]
pub enum ExpandError {
    #[error("clipboard access failed: {0}")]
    Clipboard(String),
}

#[derive(Debug, Error)]
pub enum ClipioError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error("invalid snippet: {0}")]
    InvalidSnippet(String),

    #[error("expansion target invalid: {0}")]
    ApplyTarget(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

// Global Result type alias
pub type Result<T> = std::result::Result<T, ClipioError>;
