//! Error types for adapter storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The back-end failed to read or write a document.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be serialized or deserialized.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested document does not exist.
    #[error("document not found")]
    NotFound,
}
