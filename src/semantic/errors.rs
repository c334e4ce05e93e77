use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::index::IndexError;
use crate::semantic::storage::StorageError;

/// Errors returned by the vector store and the search façade.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Model mismatch: {0}")]
    ModelMismatch(String),

    #[error("Version mismatch: file version {found}, supported version {supported}")]
    VersionMismatch { found: u16, supported: u16 },

    #[error("Corrupt collection data: {0}")]
    Corrupt(String),

    #[error("Embedding error: {0}")]
    Embedding(EmbeddingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        SearchError::StorageUnavailable(format!("{}: {}", context, err))
    }
}

impl From<EmbeddingError> for SearchError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::InvalidInput(msg) => SearchError::InvalidInput(msg),
            EmbeddingError::DimensionMismatch { expected, got } => {
                SearchError::DimensionMismatch { expected, got }
            }
            other => SearchError::Embedding(other),
        }
    }
}

impl From<IndexError> for SearchError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                SearchError::DimensionMismatch { expected, got }
            }
            other => SearchError::InvalidInput(other.to_string()),
        }
    }
}

impl From<StorageError> for SearchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => SearchError::StorageUnavailable(e.to_string()),
            StorageError::VersionMismatch { found, supported } => {
                SearchError::VersionMismatch { found, supported }
            }
            StorageError::InvalidFormat(msg) => SearchError::Corrupt(msg),
            StorageError::ChecksumMismatch => {
                SearchError::Corrupt("checksum mismatch".to_string())
            }
        }
    }
}
