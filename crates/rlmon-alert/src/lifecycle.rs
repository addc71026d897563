use crate::threshold;
use chrono::{DateTime, Utc};
use rlmon_common::error::RateLimitError;
use rlmon_common::types::{Alert, PolicyState, Severity};
use rlmon_storage::{AlertStore, StorageError};
use std::sync::Arc;

/// A snapshot that crossed a threshold.
#[derive(Debug, Clone)]
pub struct Violation {
    pub endpoint_id: String,
    pub severity: Severity,
    pub state: PolicyState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// An unresolved alert of the same severity is already open.
    SameSeverityOpen,
    /// A CRITICAL alert is open and the new violation is only WARNING.
    HigherSeverityOpen,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::SameSeverityOpen => write!(f, "same severity already open"),
            SkipReason::HigherSeverityOpen => write!(f, "higher severity already open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    Create,
    Skip(SkipReason),
}

#[derive(Debug, Clone)]
pub enum AlertOutcome {
    Created(Alert),
    Skipped(SkipReason),
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{op} failed for endpoint {endpoint_id}: {source}")]
    Store {
        op: &'static str,
        endpoint_id: String,
        #[source]
        source: StorageError,
    },

    #[error("resolve failed for alert {alert_id}: {source}")]
    Resolve {
        alert_id: String,
        #[source]
        source: StorageError,
    },

    #[error("cannot build alert for endpoint {endpoint_id}: {source}")]
    Domain {
        endpoint_id: String,
        #[source]
        source: RateLimitError,
    },
}

/// Dedup rule for a new violation against the endpoint's open alerts.
///
/// Escalation from WARNING to CRITICAL is always allowed; a repeat of the
/// same severity, or a WARNING while a CRITICAL is open, is skipped.
pub fn decide(existing: &[Alert], severity: Severity) -> AlertDecision {
    let open = existing.iter().filter(|a| !a.resolved);
    let mut critical_open = false;
    for alert in open {
        if alert.severity == severity {
            return AlertDecision::Skip(SkipReason::SameSeverityOpen);
        }
        critical_open |= alert.severity == Severity::Critical;
    }
    if critical_open && severity == Severity::Warning {
        return AlertDecision::Skip(SkipReason::HigherSeverityOpen);
    }
    AlertDecision::Create
}

/// Creates and retires alerts against an [`AlertStore`].
pub struct AlertLifecycle {
    store: Arc<dyn AlertStore>,
}

impl AlertLifecycle {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    /// Raises an alert for `violation` unless an equal or higher severity
    /// alert is already open for the endpoint.
    ///
    /// The alert is validated and inserted in a single store call, so a
    /// cancelled caller never leaves a half-created alert behind.
    pub async fn handle_violation(
        &self,
        violation: &Violation,
    ) -> Result<AlertOutcome, LifecycleError> {
        let existing = self
            .store
            .get_unresolved_by_endpoint(&violation.endpoint_id)
            .await
            .map_err(|source| LifecycleError::Store {
                op: "get_unresolved_by_endpoint",
                endpoint_id: violation.endpoint_id.clone(),
                source,
            })?;

        if let AlertDecision::Skip(reason) = decide(&existing, violation.severity) {
            tracing::debug!(
                endpoint_id = %violation.endpoint_id,
                severity = %violation.severity,
                reason = %reason,
                "Alert skipped"
            );
            return Ok(AlertOutcome::Skipped(reason));
        }

        let alert = Alert::new(&violation.endpoint_id, violation.severity, &violation.state)
            .map_err(|source| LifecycleError::Domain {
                endpoint_id: violation.endpoint_id.clone(),
                source,
            })?;

        self.store
            .insert(&alert)
            .await
            .map_err(|source| LifecycleError::Store {
                op: "insert_alert",
                endpoint_id: violation.endpoint_id.clone(),
                source,
            })?;

        tracing::debug!(
            endpoint_id = %alert.endpoint_id,
            alert_id = %alert.id,
            severity = %alert.severity,
            "Alert created"
        );
        Ok(AlertOutcome::Created(alert))
    }

    /// Resolves the endpoint's open alerts whose hysteresis band `state`
    /// has left, returning the alerts that changed.
    pub async fn auto_resolve(
        &self,
        state: &PolicyState,
        at: DateTime<Utc>,
    ) -> Result<Vec<Alert>, LifecycleError> {
        let severities = threshold::resolvable_severities(state.available_tokens, state.capacity);
        if severities.is_empty() {
            return Ok(Vec::new());
        }

        let notes = format!(
            "auto-resolved: utilization {:.2}% ({}/{} tokens remaining)",
            state.utilization_percent(),
            state.available_tokens,
            state.capacity
        );
        self.store
            .auto_resolve(&state.endpoint_id, &severities, &notes, at)
            .await
            .map_err(|source| LifecycleError::Store {
                op: "auto_resolve",
                endpoint_id: state.endpoint_id.clone(),
                source,
            })
    }

    /// Manual resolution. Resolving an already-resolved alert is a no-op.
    pub async fn resolve(
        &self,
        alert_id: &str,
        notes: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.store
            .resolve(alert_id, notes, at)
            .await
            .map_err(|source| LifecycleError::Resolve {
                alert_id: alert_id.to_string(),
                source,
            })
    }
}
