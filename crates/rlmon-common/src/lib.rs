//! Shared data model for the rate-limit monitor.
//!
//! Token-bucket [`types::Policy`] definitions, per-endpoint
//! [`types::PolicyState`] snapshots and raised [`types::Alert`]s, together
//! with the domain error type and Snowflake ID generation used by every
//! other crate in the workspace.

pub mod error;
pub mod id;
pub mod types;


pub use error::{RateLimitError, Result};
