use crate::error::{Result, StorageError};
use crate::{AlertStore, PolicyStore, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rlmon_common::types::{Alert, Policy, PolicyState, PspCategory, Severity};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

/// In-memory implementation of every store trait.
///
/// Each write takes the relevant lock once, which makes batch operations
/// and auto-resolution atomic with respect to other callers.
#[derive(Default)]
pub struct MemoryStore {
    policies: RwLock<BTreeMap<String, Policy>>,
    states: RwLock<Vec<PolicyState>>,
    alerts: RwLock<Vec<Alert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored snapshot, in insertion order.
    pub async fn all_states(&self) -> Vec<PolicyState> {
        self.states.read().await.clone()
    }

    /// Every stored alert, resolved or not.
    pub async fn all_alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

fn upsert_into(map: &mut BTreeMap<String, Policy>, policy: &Policy) {
    match map.get_mut(&policy.endpoint_id) {
        Some(existing) => {
            let created_at = existing.created_at;
            *existing = policy.clone();
            existing.created_at = created_at;
        }
        None => {
            map.insert(policy.endpoint_id.clone(), policy.clone());
        }
    }
}

fn newest_first(mut alerts: Vec<Alert>) -> Vec<Alert> {
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    alerts
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<Policy>> {
        Ok(self.policies.read().await.values().cloned().collect())
    }

    async fn get_by_id(&self, endpoint_id: &str) -> Result<Policy> {
        self.policies
            .read()
            .await
            .get(endpoint_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                entity: "policy",
                id: endpoint_id.to_string(),
            })
    }

    async fn get_by_category(&self, category: PspCategory) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .read()
            .await
            .values()
            .filter(|p| p.psp_category.map_or(true, |c| c == category))
            .cloned()
            .collect())
    }

    async fn upsert(&self, policy: &Policy) -> Result<()> {
        policy.validate()?;
        upsert_into(&mut *self.policies.write().await, policy);
        Ok(())
    }

    async fn upsert_batch(&self, policies: &[Policy]) -> Result<()> {
        for policy in policies {
            policy.validate()?;
        }
        let mut map = self.policies.write().await;
        for policy in policies {
            upsert_into(&mut map, policy);
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn insert(&self, state: &PolicyState) -> Result<()> {
        self.insert_batch(std::slice::from_ref(state)).await
    }

    async fn insert_batch(&self, states: &[PolicyState]) -> Result<()> {
        for state in states {
            state.validate()?;
        }
        let mut stored = self.states.write().await;
        let mut seen: HashSet<&str> = stored.iter().map(|s| s.id.as_str()).collect();
        if let Some(dup) = states.iter().find(|s| !seen.insert(s.id.as_str())) {
            return Err(StorageError::Other(format!(
                "duplicate snapshot id {}",
                dup.id
            )));
        }
        stored.extend(states.iter().cloned());
        Ok(())
    }

    async fn update_metrics_batch(&self, states: &[PolicyState]) -> Result<u64> {
        let mut stored = self.states.write().await;
        let mut updated = 0u64;
        for state in states {
            if let Some(existing) = stored.iter_mut().find(|s| s.id == state.id) {
                existing.consumption_rate_per_minute = state.consumption_rate_per_minute;
                existing.recovery_eta_seconds = state.recovery_eta_seconds;
                existing.exhaustion_projection_seconds = state.exhaustion_projection_seconds;
                existing.error_404_rate = state.error_404_rate;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn get_latest(&self, endpoint_id: &str) -> Result<Option<PolicyState>> {
        Ok(self
            .states
            .read()
            .await
            .iter()
            .filter(|s| s.endpoint_id == endpoint_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn get_latest_all(&self) -> Result<Vec<PolicyState>> {
        let stored = self.states.read().await;
        let mut latest: HashMap<&str, &PolicyState> = HashMap::new();
        for state in stored.iter() {
            let entry = latest.entry(state.endpoint_id.as_str()).or_insert(state);
            if state.created_at > entry.created_at {
                *entry = state;
            }
        }
        let mut out: Vec<PolicyState> = latest.into_values().cloned().collect();
        out.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        Ok(out)
    }

    async fn get_history(
        &self,
        endpoint_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PolicyState>> {
        let mut out: Vec<PolicyState> = self
            .states
            .read()
            .await
            .iter()
            .filter(|s| s.endpoint_id == endpoint_id && s.created_at >= from && s.created_at <= to)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn get_previous_before(
        &self,
        endpoint_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<PolicyState>> {
        Ok(self
            .states
            .read()
            .await
            .iter()
            .filter(|s| s.endpoint_id == endpoint_id && s.created_at < before)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut stored = self.states.write().await;
        let before = stored.len();
        stored.retain(|s| s.created_at >= cutoff);
        Ok((before - stored.len()) as u64)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert(&self, alert: &Alert) -> Result<()> {
        alert.validate()?;
        let mut alerts = self.alerts.write().await;
        if alerts.iter().any(|a| a.id == alert.id) {
            return Err(StorageError::Other(format!("duplicate alert id {}", alert.id)));
        }
        alerts.push(alert.clone());
        Ok(())
    }

    async fn get_unresolved_all(&self) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        Ok(newest_first(
            alerts.iter().filter(|a| !a.resolved).cloned().collect(),
        ))
    }

    async fn get_unresolved_by_endpoint(&self, endpoint_id: &str) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        Ok(newest_first(
            alerts
                .iter()
                .filter(|a| !a.resolved && a.endpoint_id == endpoint_id)
                .cloned()
                .collect(),
        ))
    }

    async fn get_unresolved_by_severity(&self, severity: Severity) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        Ok(newest_first(
            alerts
                .iter()
                .filter(|a| !a.resolved && a.severity == severity)
                .cloned()
                .collect(),
        ))
    }

    async fn resolve(&self, id: &str, notes: &str, at: DateTime<Utc>) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "alert",
                id: id.to_string(),
            })?;
        if !alert.resolved {
            alert.resolve(notes, at);
        }
        Ok(())
    }

    async fn resolve_bulk(&self, ids: &[String], notes: &str, at: DateTime<Utc>) -> Result<u64> {
        let mut alerts = self.alerts.write().await;
        let mut resolved = 0u64;
        for alert in alerts
            .iter_mut()
            .filter(|a| !a.resolved && ids.contains(&a.id))
        {
            alert.resolve(notes, at);
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn auto_resolve(
        &self,
        endpoint_id: &str,
        severities: &[Severity],
        notes: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let mut alerts = self.alerts.write().await;
        let mut resolved = Vec::new();
        for alert in alerts.iter_mut().filter(|a| {
            !a.resolved && a.endpoint_id == endpoint_id && severities.contains(&a.severity)
        }) {
            alert.resolve(notes, at);
            resolved.push(alert.clone());
        }
        Ok(resolved)
    }

    async fn get_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        Ok(newest_first(
            alerts
                .iter()
                .filter(|a| a.created_at >= from && a.created_at <= to)
                .cloned()
                .collect(),
        ))
    }

    async fn get_history_by_endpoint(
        &self,
        endpoint_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        Ok(newest_first(
            alerts
                .iter()
                .filter(|a| a.endpoint_id == endpoint_id && a.created_at >= from && a.created_at <= to)
                .cloned()
                .collect(),
        ))
    }
}
