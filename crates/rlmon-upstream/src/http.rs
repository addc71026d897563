use crate::error::{Result, UpstreamError};
use crate::{DirectoryClient, PolicyListing};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rlmon_common::types::{Policy, PolicyState, PspCategory};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub(crate) struct PolicyDto {
    pub endpoint_id: String,
    #[serde(default)]
    pub endpoint_path: String,
    #[serde(default)]
    pub http_method: String,
    pub capacity: i64,
    pub refill_tokens: i64,
    pub refill_period_sec: i64,
    #[serde(default)]
    pub psp_category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PolicyListDto {
    #[serde(default)]
    pub psp_category: Option<String>,
    #[serde(default)]
    pub policies: Vec<PolicyDto>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StateDto {
    pub endpoint_id: String,
    pub available_tokens: i64,
    pub capacity: i64,
    pub refill_tokens: i64,
    pub refill_period_sec: i64,
    #[serde(default)]
    pub psp_category: Option<String>,
    pub response_timestamp: DateTime<Utc>,
}

fn invalid(endpoint_id: &str, source: rlmon_common::RateLimitError) -> UpstreamError {
    UpstreamError::Invalid {
        endpoint_id: endpoint_id.to_string(),
        source,
    }
}

impl PolicyDto {
    pub(crate) fn into_policy(self) -> Result<Policy> {
        let category = PspCategory::parse_optional(self.psp_category.as_deref())
            .map_err(|e| invalid(&self.endpoint_id, e))?;
        Policy::new(
            self.endpoint_id.clone(),
            self.endpoint_path,
            self.http_method,
            self.capacity,
            self.refill_tokens,
            self.refill_period_sec,
            category,
        )
        .map_err(|e| invalid(&self.endpoint_id, e))
    }
}

impl PolicyListDto {
    pub(crate) fn into_listing(self) -> Result<PolicyListing> {
        let psp_category = PspCategory::parse_optional(self.psp_category.as_deref())
            .map_err(|e| invalid("*", e))?;
        let policies = self
            .policies
            .into_iter()
            .map(PolicyDto::into_policy)
            .collect::<Result<Vec<_>>>()?;
        Ok(PolicyListing {
            policies,
            psp_category,
        })
    }
}

impl StateDto {
    pub(crate) fn into_state(self) -> Result<PolicyState> {
        let category = PspCategory::parse_optional(self.psp_category.as_deref())
            .map_err(|e| invalid(&self.endpoint_id, e))?;
        PolicyState::new(
            self.endpoint_id.clone(),
            self.available_tokens,
            self.capacity,
            self.refill_tokens,
            self.refill_period_sec,
            category,
            self.response_timestamp,
        )
        .map_err(|e| invalid(&self.endpoint_id, e))
    }
}

/// [`DirectoryClient`] over the directory's HTTP/JSON rate-limit API.
///
/// - `GET {base}/rate-limit/policies`
/// - `GET {base}/rate-limit/policies/{endpoint_id}/state`
pub struct HttpDirectoryClient {
    base_url: reqwest::Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let mut base_url = reqwest::Url::parse(base_url)
            .map_err(|e| UpstreamError::Config(format!("base_url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(UpstreamError::Config(format!(
                "base_url '{base_url}' cannot be a base"
            )));
        }
        // Url::join drops the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<reqwest::Url> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::Config(format!("invalid path '{path}': {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: reqwest::Url) -> Result<T> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Upstream returned error status");
            return Err(UpstreamError::from_status(status.as_u16(), body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn list_policies(&self) -> Result<PolicyListing> {
        let url = self.endpoint("rate-limit/policies")?;
        let dto: PolicyListDto = self.get_json(url).await?;
        dto.into_listing()
    }

    async fn get_state(&self, endpoint_id: &str) -> Result<PolicyState> {
        let mut url = self.endpoint("rate-limit/policies")?;
        url.path_segments_mut()
            .map_err(|_| UpstreamError::Config("base_url cannot be a base".into()))?
            .push(endpoint_id)
            .push("state");
        let dto: StateDto = self.get_json(url).await?;
        dto.into_state()
    }
}
