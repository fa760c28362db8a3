//! Error types for hmcs-core.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using hmcs-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for calls into a summarization or embedding service
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Core error types for memory operations
#[derive(Error, Debug)]
pub enum Error {
    // Remote service errors
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    // Embedding invariants
    #[error("Cosine similarity is undefined for a zero-norm embedding")]
    ZeroNorm,

    #[error("Embedding norm is not finite")]
    NonFiniteNorm,

    #[error("Embedding is empty")]
    EmptyEmbedding,

    #[error("Embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    // Summary node lifecycle
    #[error("Summary node already summarized: {0}")]
    AlreadySummarized(Uuid),

    #[error("Summary node has no digest yet: {0}")]
    NotSummarized(Uuid),

    // Persistence errors
    #[error("Corrupt memory document: {0}")]
    CorruptDocument(String),

    #[cfg(feature = "db")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("Invalid value for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a corrupt document error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptDocument(message.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from a transient service failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Service(e) if e.is_transient())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Failure reported by a summarization or embedding service.
///
/// Transient failures (rate limiting, temporary unavailability) may be
/// retried; fatal ones (bad request, malformed payload) may not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl ServiceError {
    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Check if this error may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
