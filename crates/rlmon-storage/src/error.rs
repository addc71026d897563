use rlmon_common::RateLimitError;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use rlmon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert",
///     id: "42".to_string(),
/// };
/// assert!(err.to_string().contains("alert"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The entity failed domain validation and was not written.
    #[error("Storage: rejected invalid entity: {0}")]
    Domain(#[from] RateLimitError),

    /// The blocking task driving the connection panicked or was cancelled.
    #[error("Storage: blocking task failed: {0}")]
    Task(String),

    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
