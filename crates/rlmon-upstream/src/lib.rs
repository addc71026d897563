//! Client side of the upstream directory API that exposes per-endpoint
//! token-bucket policies and their live state.
//!
//! The [`DirectoryClient`] trait is what the monitoring pipeline depends
//! on; [`http::HttpDirectoryClient`] implements it over HTTP/JSON. Retries
//! are the caller's concern: errors carry
//! [`error::UpstreamError::is_retryable`] instead.

pub mod error;
pub mod http;

#[cfg(test)]
mod tests;

pub use error::{Result, UpstreamError};
pub use http::HttpDirectoryClient;

use async_trait::async_trait;
use rlmon_common::types::{Policy, PolicyState, PspCategory};

/// Every policy visible to this participant, plus the participant's own
/// category.
#[derive(Debug, Clone, Default)]
pub struct PolicyListing {
    pub policies: Vec<Policy>,
    pub psp_category: Option<PspCategory>,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_policies(&self) -> Result<PolicyListing>;

    /// Current bucket state of one endpoint, as a validated snapshot.
    async fn get_state(&self, endpoint_id: &str) -> Result<PolicyState>;
}
