use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store itself cannot be reached; fatal to the current operation.
    #[error("rule store unavailable: {0}")]
    Unavailable(String),

    /// Similarity search is down; exact-tag listing may still work.
    #[error("similarity index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "lancedb")]
    #[error("lancedb error: {0}")]
    Lance(#[from] ::lancedb::Error),

    #[cfg(feature = "lancedb")]
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("{0}")]
    Other(String),
}
