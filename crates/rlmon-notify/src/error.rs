/// Errors that can occur while publishing alert lifecycle events.
///
/// # Examples
///
/// ```rust
/// use rlmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing url".to_string());
/// assert!(err.to_string().contains("missing url"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Publisher configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid publisher configuration: {0}")]
    InvalidConfig(String),

    /// An HTTP request to the event sink failed.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The event sink returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Notify: {0}")]
    Other(String),
}

/// Convenience `Result` alias for publisher operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
