use super::report::Stage;
use rlmon_common::RateLimitError;
use rlmon_notify::NotifyError;
use rlmon_storage::StorageError;
use rlmon_upstream::UpstreamError;
use std::time::Duration;

fn endpoint_suffix(endpoint: &Option<String>) -> String {
    endpoint
        .as_deref()
        .map(|e| format!(" (endpoint {e})"))
        .unwrap_or_default()
}

/// Collaborator failures, wrapped with the operation and endpoint they
/// happened on.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("upstream {op} failed{}: {source}", endpoint_suffix(.endpoint))]
    Upstream {
        op: &'static str,
        endpoint: Option<String>,
        #[source]
        source: UpstreamError,
    },

    #[error("store {op} failed{}: {source}", endpoint_suffix(.endpoint))]
    Store {
        op: &'static str,
        endpoint: Option<String>,
        #[source]
        source: StorageError,
    },

    #[error("{op} failed{}: {source}", endpoint_suffix(.endpoint))]
    Domain {
        op: &'static str,
        endpoint: Option<String>,
        #[source]
        source: RateLimitError,
    },

    #[error("publish {op} failed (endpoint {endpoint}): {source}")]
    Publish {
        op: &'static str,
        endpoint: String,
        #[source]
        source: NotifyError,
    },

    #[error("stage {stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
}

impl PipelineError {
    pub fn store(op: &'static str, endpoint: Option<&str>, source: StorageError) -> Self {
        PipelineError::Store {
            op,
            endpoint: endpoint.map(str::to_string),
            source,
        }
    }

    pub fn upstream(op: &'static str, endpoint: Option<&str>, source: UpstreamError) -> Self {
        PipelineError::Upstream {
            op,
            endpoint: endpoint.map(str::to_string),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
