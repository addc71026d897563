use crate::types::Severity;

/// Errors raised by the rate-limit domain model and its pure calculations.
///
/// Validation variants are returned at construction time so that an invalid
/// policy, snapshot or alert never reaches a store. [`RateLimitError::InsufficientData`]
/// is an expected condition on the first observation of an endpoint, not a
/// failure.
///
/// # Examples
///
/// ```rust
/// use rlmon_common::error::RateLimitError;
///
/// let err = RateLimitError::validation("capacity", 0, "must be greater than zero");
/// assert!(err.to_string().contains("capacity"));
/// assert!(!RateLimitError::InsufficientData.is_validation());
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    #[error("capacity must be greater than zero")]
    InvalidCapacity,

    #[error("refill tokens and period must be greater than zero")]
    InvalidRefillRate,

    #[error("available tokens cannot be negative")]
    NegativeTokens,

    #[error("available tokens cannot exceed capacity")]
    TokensExceedCapacity,

    #[error("threshold must be 10 (CRITICAL) or 20 (WARNING)")]
    InvalidThreshold,

    #[error("severity must be WARNING or CRITICAL")]
    InvalidSeverity,

    #[error("PSP category must be A, B, C, D, E, F, G, or H")]
    InvalidCategory,

    /// No predecessor snapshot exists yet for the endpoint.
    #[error("insufficient data for calculation")]
    InsufficientData,

    /// Elapsed time or refill rate was zero or negative.
    #[error("division by zero in calculation")]
    DivisionByZero,

    #[error("validation error on field '{field}': {message} (value: {value})")]
    Validation {
        field: &'static str,
        value: String,
        message: &'static str,
    },

    /// An alert's severity does not agree with the snapshot it was raised from.
    #[error("severity {severity} requires utilization >= {required}%, got {actual:.2}%")]
    SeverityMismatch {
        severity: Severity,
        required: i64,
        actual: f64,
    },
}

impl RateLimitError {
    pub fn validation(field: &'static str, value: impl ToString, message: &'static str) -> Self {
        Self::Validation {
            field,
            value: value.to_string(),
            message,
        }
    }

    /// True for errors that reject a malformed entity, as opposed to
    /// calculation outcomes.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::InsufficientData | Self::DivisionByZero)
    }
}

pub type Result<T> = std::result::Result<T, RateLimitError>;
