use rlmon_common::RateLimitError;

/// Errors that can occur when talking to the upstream directory API.
///
/// Every variant knows whether a retry could help; authentication and
/// permission failures never do.
///
/// # Examples
///
/// ```rust
/// use rlmon_upstream::error::UpstreamError;
///
/// let err = UpstreamError::PermissionDenied("policies".to_string());
/// assert!(!err.is_retryable());
/// assert!(UpstreamError::Unavailable("503".to_string()).is_retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Credentials missing or rejected (401).
    #[error("Upstream: unauthenticated: {0}")]
    Unauthenticated(String),

    /// Credentials valid but not allowed to read the resource (403).
    #[error("Upstream: permission denied: {0}")]
    PermissionDenied(String),

    #[error("Upstream: not found: {0}")]
    NotFound(String),

    /// Request was throttled. Callers may retry after backoff.
    #[error("Upstream: rate limited, retry after backoff")]
    RateLimited,

    #[error("Upstream: service unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream: request timed out")]
    Timeout,

    /// Any other non-2xx status.
    #[error("Upstream: HTTP error: status={status}, body={body}")]
    Http { status: u16, body: String },

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Upstream: network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Upstream: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The upstream returned data that violates the domain invariants.
    #[error("Upstream: invalid data for endpoint {endpoint_id}: {source}")]
    Invalid {
        endpoint_id: String,
        #[source]
        source: RateLimitError,
    },

    #[error("Upstream: configuration error: {0}")]
    Config(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::RateLimited
            | UpstreamError::Unavailable(_)
            | UpstreamError::Timeout
            | UpstreamError::Network(_) => true,
            UpstreamError::Http { status, .. } => *status >= 500,
            UpstreamError::Unauthenticated(_)
            | UpstreamError::PermissionDenied(_)
            | UpstreamError::NotFound(_)
            | UpstreamError::Json(_)
            | UpstreamError::Invalid { .. }
            | UpstreamError::Config(_) => false,
        }
    }

    /// Authentication or authorization failure.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unauthenticated(_) | UpstreamError::PermissionDenied(_)
        )
    }

    /// Maps a non-success HTTP status to the matching variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 => UpstreamError::Unauthenticated(body),
            403 => UpstreamError::PermissionDenied(body),
            404 => UpstreamError::NotFound(body),
            429 => UpstreamError::RateLimited,
            502..=504 => UpstreamError::Unavailable(format!("status {status}: {body}")),
            _ => UpstreamError::Http { status, body },
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Network(e)
        }
    }
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, UpstreamError>;
