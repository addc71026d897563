use chrono::{DateTime, Utc};
use rlmon_common::types::{Alert, PspCategory, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "rate_limit.alert.created")]
    Created,
    #[serde(rename = "rate_limit.alert.resolved")]
    Resolved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "rate_limit.alert.created",
            EventType::Resolved => "rate_limit.alert.resolved",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire payload for an alert being raised or retired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertLifecycleEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub alert_id: String,
    pub endpoint_id: String,
    pub severity: Severity,
    pub available_tokens: i64,
    pub capacity: i64,
    pub utilization_percent: f64,
    pub recovery_eta_seconds: i64,
    pub exhaustion_projection_seconds: i64,
    pub psp_category: Option<PspCategory>,
    pub message: String,
}

impl AlertLifecycleEvent {
    fn from_alert(
        alert: &Alert,
        event_type: EventType,
        timestamp: DateTime<Utc>,
        message: String,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp,
            alert_id: alert.id.clone(),
            endpoint_id: alert.endpoint_id.clone(),
            severity: alert.severity,
            available_tokens: alert.available_tokens,
            capacity: alert.capacity,
            utilization_percent: alert.utilization_percent,
            recovery_eta_seconds: alert.recovery_eta_seconds,
            exhaustion_projection_seconds: alert.exhaustion_projection_seconds,
            psp_category: alert.psp_category,
            message,
        }
    }

    pub fn created(alert: &Alert) -> Self {
        Self::from_alert(
            alert,
            EventType::Created,
            alert.created_at,
            alert.message.clone(),
        )
    }

    /// The message carries the resolution notes when there are any.
    pub fn resolved(alert: &Alert) -> Self {
        let message = alert
            .resolution_notes
            .clone()
            .unwrap_or_else(|| alert.message.clone());
        Self::from_alert(
            alert,
            EventType::Resolved,
            alert.resolved_at.unwrap_or_else(Utc::now),
            message,
        )
    }

    /// Partition key: events of one endpoint stay ordered.
    pub fn key(&self) -> &str {
        &self.endpoint_id
    }

    /// Routing properties attached next to the payload.
    pub fn properties(&self) -> BTreeMap<&'static str, String> {
        let mut props = BTreeMap::new();
        props.insert("event_type", self.event_type.to_string());
        props.insert("severity", self.severity.to_string());
        props.insert(
            "category",
            self.psp_category
                .map(|c| c.to_string())
                .unwrap_or_default(),
        );
        props
    }
}
