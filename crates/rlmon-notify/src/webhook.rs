use crate::{AlertLifecycleEvent, EventPublisher, NotifyError, Result};
use async_trait::async_trait;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const MAX_BODY_LENGTH: usize = 512;

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Posts each event as JSON to a fixed URL.
///
/// The endpoint ID travels in the `X-Event-Key` header and the event type
/// in `X-Event-Type`. Transport errors and 5xx responses are retried up to
/// three times with a short doubling delay; 4xx responses are not retried.
pub struct WebhookPublisher {
    url: reqwest::Url,
    client: reqwest::Client,
}

impl WebhookPublisher {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook url '{url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::InvalidConfig(format!(
                "webhook url must be http(s), got '{}'",
                url.scheme()
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, event: &AlertLifecycleEvent) -> Result<()> {
        let body = serde_json::to_string(event)?;
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            match self
                .client
                .post(self.url.clone())
                .header("Content-Type", "application/json")
                .header("X-Event-Key", event.key())
                .header("X-Event-Type", event.event_type.as_str())
                .body(body.clone())
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        tracing::debug!(
                            event_id = %event.event_id,
                            endpoint_id = %event.endpoint_id,
                            attempt = attempt + 1,
                            "Event delivered to webhook"
                        );
                        return Ok(());
                    }
                    let resp_body = match resp.text().await {
                        Ok(text) => truncate(&text, MAX_BODY_LENGTH),
                        Err(e) => format!("[failed to read response body: {e}]"),
                    };
                    let err = NotifyError::Api {
                        service: "webhook".to_string(),
                        status: status.as_u16(),
                        body: resp_body,
                    };
                    if status.is_client_error() {
                        return Err(err);
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Webhook returned non-success status, retrying"
                    );
                    last_err = Some(err);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "Webhook send failed, retrying"
                    );
                    last_err = Some(NotifyError::Http(e));
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| NotifyError::Other("webhook delivery failed".into())))
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
