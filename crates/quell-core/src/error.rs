//! Error types for quell-core.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for quell-core.
///
/// Per-group failures inside a reconciliation pass never surface here;
/// they are aggregated into a [`crate::report::Summary`] so one bad group
/// cannot abort the rest of the batch. This type covers operations outside
/// a pass (logging setup, direct store access from embedders).
#[derive(Error, Debug)]
pub enum Error {
    /// Redundant store errors
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Host collaborator errors
    #[error("host error: {0}")]
    Host(#[from] crate::host::HostError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Logging initialization errors
    #[error("logging setup failed: {0}")]
    Logging(String),
}
