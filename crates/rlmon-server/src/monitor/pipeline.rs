use super::error::{PipelineError, Result};
use super::report::{Stage, StageReport, StageStatus, TickOutcome, TickPhase, TickReport};
use super::retry::RetryPolicy;
use crate::config::{CleanupConfig, MonitorConfig};
use crate::metrics::MetricsExporter;
use chrono::{DateTime, Months, NaiveTime, Utc};
use futures::stream::{self, StreamExt};
use rlmon_alert::calculator;
use rlmon_alert::threshold::{self, ThresholdSummary};
use rlmon_alert::{AlertLifecycle, AlertOutcome, Violation};
use rlmon_common::types::{Alert, PolicyState};
use rlmon_notify::{AlertLifecycleEvent, EventPublisher};
use rlmon_storage::{AlertStore, PolicyStore, StateStore};
use rlmon_upstream::{DirectoryClient, UpstreamError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Collaborators a tick talks to.
#[derive(Clone)]
pub struct PipelineDeps {
    pub policies: Arc<dyn PolicyStore>,
    pub states: Arc<dyn StateStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub directory: Arc<dyn DirectoryClient>,
    pub publisher: Arc<dyn EventPublisher>,
    pub metrics: Arc<dyn MetricsExporter>,
}

/// Daily wall-clock window (UTC) in which retention cleanup runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWindow {
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
    pub window_minutes: u32,
    pub retention_months: u32,
}

impl Default for CleanupWindow {
    fn default() -> Self {
        Self::from(&CleanupConfig::default())
    }
}

impl From<&CleanupConfig> for CleanupWindow {
    fn from(config: &CleanupConfig) -> Self {
        Self {
            enabled: config.enabled,
            hour: config.hour,
            minute: config.minute,
            window_minutes: config.window_minutes,
            retention_months: config.retention_months,
        }
    }
}

impl CleanupWindow {
    /// True when `now` falls in `[hour:minute, hour:minute + window)`.
    /// A window that crosses midnight is honoured on both sides.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(opens_at) = NaiveTime::from_hms_opt(self.hour, self.minute, 0) else {
            return false;
        };
        let width = chrono::Duration::minutes(i64::from(self.window_minutes));
        let today = now.date_naive().and_time(opens_at).and_utc();
        [today, today - chrono::Duration::days(1)]
            .into_iter()
            .any(|start| now >= start && now < start + width)
    }

    /// Snapshots created before this instant are purged.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_months(Months::new(self.retention_months))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub tick_timeout: Duration,
    pub stage_timeout: Duration,
    pub concurrency: usize,
    pub cleanup: CleanupWindow,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retry),
            tick_timeout: Duration::from_secs(config.schedule.tick_timeout_secs),
            stage_timeout: Duration::from_secs(config.schedule.stage_timeout_secs),
            concurrency: config.schedule.concurrency.max(1),
            cleanup: CleanupWindow::from(&config.cleanup),
        }
    }
}

struct Fetched {
    policies: usize,
    states: Vec<PolicyState>,
    failures: usize,
}

struct Enriched {
    states: Vec<PolicyState>,
    failures: usize,
}

struct Classified {
    latest: Vec<PolicyState>,
    summary: ThresholdSummary,
    violations: Vec<Violation>,
}

#[derive(Default)]
struct Alerted {
    created: Vec<Alert>,
    skipped: usize,
    failures: usize,
}

#[derive(Default)]
struct Published {
    sent: usize,
    failures: usize,
}

#[derive(Default)]
struct Resolved {
    alerts: usize,
    failures: usize,
    published: Published,
}

/// One monitoring pass: fetch, enrich, classify, alert, publish,
/// auto-resolve and, once a day, purge old snapshots.
///
/// Fetch and classify are critical; any other stage may fail without
/// failing the tick. The pipeline does not guard against overlapping
/// ticks; the scheduler runs them one at a time.
pub struct MonitorPipeline {
    deps: PipelineDeps,
    settings: PipelineSettings,
    lifecycle: Arc<AlertLifecycle>,
    phase: watch::Sender<TickPhase>,
}

impl MonitorPipeline {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        let lifecycle = Arc::new(AlertLifecycle::new(deps.alerts.clone()));
        let (phase, _) = watch::channel(TickPhase::Idle);
        Self {
            deps,
            settings,
            lifecycle,
            phase,
        }
    }

    pub fn phase(&self) -> TickPhase {
        *self.phase.borrow()
    }

    /// Receiver that follows phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<TickPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: TickPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "Tick phase changed");
        }
    }

    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let started = Instant::now();
        let deadline = started + self.settings.tick_timeout;
        let mut report = TickReport::new(now);

        if let Err((stage, e)) = self.run_stages(&mut report, deadline, now).await {
            report.outcome = TickOutcome::Failed {
                stage,
                error: e.to_string(),
            };
        }

        self.set_phase(TickPhase::Idle);
        report.finished_at = now
            + chrono::Duration::from_std(started.elapsed())
                .unwrap_or_else(|_| chrono::Duration::zero());

        match &report.outcome {
            TickOutcome::Succeeded => tracing::info!(
                policies = report.policies_fetched,
                states = report.states_fetched,
                ok = report.ok_count,
                warning = report.warning_count,
                critical = report.critical_count,
                created = report.alerts_created,
                skipped = report.alerts_skipped,
                resolved = report.alerts_resolved,
                degraded = report.is_degraded(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Monitoring tick finished"
            ),
            TickOutcome::Failed { stage, error } => tracing::error!(
                stage = %stage,
                error = %error,
                "Monitoring tick failed"
            ),
        }
        report
    }

    async fn run_stages(
        &self,
        report: &mut TickReport,
        deadline: Instant,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), (Stage, PipelineError)> {
        let fetched = self
            .run_stage(report, deadline, Stage::Fetch, self.fetch(now))
            .await
            .map_err(|e| (Stage::Fetch, e))?;
        report.policies_fetched = fetched.policies;
        report.states_fetched = fetched.states.len();
        report.state_fetch_failures = fetched.failures;
        if fetched.failures > 0 {
            report.mark_degraded(
                Stage::Fetch,
                format!("{} endpoint states could not be fetched", fetched.failures),
            );
        }

        // A failed enrichment write leaves the stored snapshots un-enriched,
        // so nothing is overlaid in that case.
        let enriched = match self
            .run_stage(report, deadline, Stage::Enrich, self.enrich(&fetched.states))
            .await
        {
            Ok(enriched) => {
                report.states_enriched = enriched.states.len();
                report.enrich_failures = enriched.failures;
                if enriched.failures > 0 {
                    report.mark_degraded(
                        Stage::Enrich,
                        format!("{} snapshots could not be enriched", enriched.failures),
                    );
                }
                enriched.states
            }
            Err(_) => {
                report.enrich_failures = fetched.states.len();
                Vec::new()
            }
        };

        let classified = self
            .run_stage(report, deadline, Stage::Classify, self.classify(&enriched))
            .await
            .map_err(|e| (Stage::Classify, e))?;
        report.ok_count = classified.summary.ok;
        report.warning_count = classified.summary.warning;
        report.critical_count = classified.summary.critical;

        let created = match self
            .run_stage(
                report,
                deadline,
                Stage::Alert,
                self.create_alerts(&classified.violations),
            )
            .await
        {
            Ok(alerted) => {
                report.alerts_created = alerted.created.len();
                report.alerts_skipped = alerted.skipped;
                report.alert_failures = alerted.failures;
                if alerted.failures > 0 {
                    report.mark_degraded(
                        Stage::Alert,
                        format!("{} violations could not be alerted", alerted.failures),
                    );
                }
                alerted.created
            }
            Err(_) => Vec::new(),
        };

        if let Ok(published) = self
            .run_stage(report, deadline, Stage::Publish, self.publish_created(&created))
            .await
        {
            report.events_published += published.sent;
            report.publish_failures += published.failures;
            if published.failures > 0 {
                report.mark_degraded(
                    Stage::Publish,
                    format!("{} events could not be published", published.failures),
                );
            }
        }

        if let Ok(resolved) = self
            .run_stage(
                report,
                deadline,
                Stage::AutoResolve,
                self.auto_resolve(&classified.latest, now),
            )
            .await
        {
            report.alerts_resolved = resolved.alerts;
            report.resolve_failures = resolved.failures;
            report.events_published += resolved.published.sent;
            report.publish_failures += resolved.published.failures;
            if resolved.failures > 0 || resolved.published.failures > 0 {
                report.mark_degraded(
                    Stage::AutoResolve,
                    format!(
                        "{} endpoints failed to resolve, {} events unpublished",
                        resolved.failures, resolved.published.failures
                    ),
                );
            }
        }

        match self.settings.cleanup.cutoff(now) {
            Some(cutoff) if self.settings.cleanup.is_due(now) => {
                if let Ok(purged) = self
                    .run_stage(report, deadline, Stage::Cleanup, self.cleanup(cutoff))
                    .await
                {
                    report.states_purged = purged;
                }
            }
            _ => report.stages.push(StageReport {
                stage: Stage::Cleanup,
                status: StageStatus::Skipped,
                duration_ms: 0,
                error: None,
            }),
        }

        Ok(())
    }

    /// Times `work` against the stage and tick budgets and records the
    /// stage's report entry.
    async fn run_stage<T>(
        &self,
        report: &mut TickReport,
        deadline: Instant,
        stage: Stage,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        self.set_phase(stage.phase());
        let limit = self
            .settings
            .stage_timeout
            .min(deadline.saturating_duration_since(Instant::now()));

        let started = Instant::now();
        let result = match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                stage,
                after: limit,
            }),
        };
        let elapsed = started.elapsed();
        self.deps.metrics.observe_stage(stage.name(), elapsed);

        let (status, error) = match &result {
            Ok(_) => (StageStatus::Succeeded, None),
            Err(e) => {
                if stage.is_critical() {
                    tracing::error!(stage = %stage, error = %e, "Critical stage failed");
                } else {
                    tracing::warn!(stage = %stage, error = %e, "Stage failed, continuing");
                }
                (StageStatus::Failed, Some(e.to_string()))
            }
        };
        report.stages.push(StageReport {
            stage,
            status,
            duration_ms: elapsed.as_millis() as u64,
            error,
        });
        result
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<Fetched> {
        let retry = &self.settings.retry;
        let directory = &self.deps.directory;

        let listing = retry
            .retry(
                "list_policies",
                || directory.list_policies(),
                UpstreamError::is_retryable,
            )
            .await
            .map_err(|e| PipelineError::upstream("list_policies", None, e))?;

        if let Some(category) = listing.psp_category {
            tracing::debug!(psp_category = %category, "Participant category");
        }

        self.deps
            .policies
            .upsert_batch(&listing.policies)
            .await
            .map_err(|e| PipelineError::store("upsert_policies", None, e))?;

        let endpoint_ids: Vec<String> = listing
            .policies
            .iter()
            .map(|p| p.endpoint_id.clone())
            .collect();
        let results: Vec<_> = stream::iter(endpoint_ids)
            .map(|endpoint_id| fetch_state(directory.clone(), retry.clone(), endpoint_id))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut states = Vec::with_capacity(results.len());
        let mut failures = 0;
        for (endpoint_id, result) in results {
            match result {
                Ok(state) => states.push(state.with_created_at(now)),
                Err(e) if e.is_auth() => {
                    return Err(PipelineError::upstream("get_state", Some(endpoint_id.as_str()), e));
                }
                Err(e) => {
                    tracing::warn!(endpoint_id = %endpoint_id, error = %e, "Failed to fetch endpoint state");
                    failures += 1;
                }
            }
        }

        if !states.is_empty() {
            self.deps
                .states
                .insert_batch(&states)
                .await
                .map_err(|e| PipelineError::store("insert_states", None, e))?;
        }

        Ok(Fetched {
            policies: listing.policies.len(),
            states,
            failures,
        })
    }

    async fn enrich(&self, fetched: &[PolicyState]) -> Result<Enriched> {
        let store = &self.deps.states;

        let results: Vec<Result<PolicyState>> = stream::iter(fetched.to_vec())
            .map(|state| enrich_state(store.clone(), state))
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut states = Vec::with_capacity(results.len());
        let mut failures = 0;
        for result in results {
            match result {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(error = %e, "Enrichment failed, keeping raw snapshot");
                    failures += 1;
                }
            }
        }

        if !states.is_empty() {
            store
                .update_metrics_batch(&states)
                .await
                .map_err(|e| PipelineError::store("update_metrics", None, e))?;
        }

        Ok(Enriched { states, failures })
    }

    async fn classify(&self, enriched: &[PolicyState]) -> Result<Classified> {
        let mut latest = self
            .deps
            .states
            .get_latest_all()
            .await
            .map_err(|e| PipelineError::store("get_latest_all", None, e))?;

        let overlay: HashMap<&str, &PolicyState> =
            enriched.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut summary = ThresholdSummary::default();
        let mut violations = Vec::new();
        for state in latest.iter_mut() {
            if let Some(fresh) = overlay.get(state.id.as_str()) {
                *state = (*fresh).clone();
            }
            self.deps.metrics.record_state(state);

            let status = threshold::analyze(state);
            summary.record(status);
            if let Some(severity) = status.severity() {
                violations.push(Violation {
                    endpoint_id: state.endpoint_id.clone(),
                    severity,
                    state: state.clone(),
                });
            }
        }

        Ok(Classified {
            latest,
            summary,
            violations,
        })
    }

    async fn create_alerts(&self, violations: &[Violation]) -> Result<Alerted> {
        let outcomes: Vec<_> = stream::iter(violations.to_vec())
            .map(|violation| {
                let lifecycle = self.lifecycle.clone();
                async move { lifecycle.handle_violation(&violation).await }
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        let mut alerted = Alerted::default();
        for outcome in outcomes {
            match outcome {
                Ok(AlertOutcome::Created(alert)) => {
                    tracing::info!(
                        endpoint_id = %alert.endpoint_id,
                        alert_id = %alert.id,
                        severity = %alert.severity,
                        utilization = %format!("{:.2}%", alert.utilization_percent),
                        "Alert raised"
                    );
                    self.deps.metrics.alert_created(&alert);
                    alerted.created.push(alert);
                }
                Ok(AlertOutcome::Skipped(_)) => alerted.skipped += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to handle violation");
                    alerted.failures += 1;
                }
            }
        }
        Ok(alerted)
    }

    /// Publishes in order; a failure is counted and not retried this tick.
    async fn publish(&self, events: impl Iterator<Item = AlertLifecycleEvent>) -> Published {
        let mut published = Published::default();
        for event in events {
            match self.deps.publisher.publish(&event).await {
                Ok(()) => published.sent += 1,
                Err(source) => {
                    let e = PipelineError::Publish {
                        op: event.event_type.as_str(),
                        endpoint: event.endpoint_id.clone(),
                        source,
                    };
                    tracing::warn!(
                        publisher = self.deps.publisher.name(),
                        alert_id = %event.alert_id,
                        error = %e,
                        "Failed to publish alert event"
                    );
                    published.failures += 1;
                }
            }
        }
        published
    }

    async fn publish_created(&self, created: &[Alert]) -> Result<Published> {
        Ok(self
            .publish(created.iter().map(AlertLifecycleEvent::created))
            .await)
    }

    async fn auto_resolve(&self, latest: &[PolicyState], now: DateTime<Utc>) -> Result<Resolved> {
        let mut resolved = Resolved::default();
        let mut retired = Vec::new();
        for state in latest {
            match self.lifecycle.auto_resolve(state, now).await {
                Ok(alerts) => {
                    for alert in alerts {
                        tracing::info!(
                            endpoint_id = %alert.endpoint_id,
                            alert_id = %alert.id,
                            severity = %alert.severity,
                            "Alert auto-resolved"
                        );
                        self.deps.metrics.alert_resolved(&alert);
                        retired.push(alert);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Auto-resolve failed");
                    resolved.failures += 1;
                }
            }
        }
        resolved.alerts = retired.len();
        resolved.published = self
            .publish(retired.iter().map(AlertLifecycleEvent::resolved))
            .await;
        Ok(resolved)
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let purged = self
            .deps
            .states
            .delete_older_than(cutoff)
            .await
            .map_err(|e| PipelineError::store("delete_older_than", None, e))?;
        tracing::info!(purged, cutoff = %cutoff, "Purged old snapshots");
        Ok(purged)
    }
}

// Fan-out futures own their inputs so the tick future stays `Send`.
async fn fetch_state(
    directory: Arc<dyn DirectoryClient>,
    retry: RetryPolicy,
    endpoint_id: String,
) -> (String, std::result::Result<PolicyState, UpstreamError>) {
    let result = retry
        .retry(
            "get_state",
            || directory.get_state(&endpoint_id),
            UpstreamError::is_retryable,
        )
        .await;
    (endpoint_id, result)
}

async fn enrich_state(store: Arc<dyn StateStore>, mut state: PolicyState) -> Result<PolicyState> {
    let previous = store
        .get_previous_before(&state.endpoint_id, state.created_at)
        .await
        .map_err(|e| {
            PipelineError::store("get_previous_before", Some(state.endpoint_id.as_str()), e)
        })?;
    let enrichment = calculator::enrich(&mut state, previous.as_ref()).map_err(|source| {
        PipelineError::Domain {
            op: "enrich",
            endpoint: Some(state.endpoint_id.clone()),
            source,
        }
    })?;
    if enrichment.category_changed {
        tracing::info!(
            endpoint_id = %state.endpoint_id,
            from = ?previous.as_ref().and_then(|p| p.psp_category),
            to = ?state.psp_category,
            "PSP category changed"
        );
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 31, h, m, s).unwrap()
    }

    #[test]
    fn cleanup_window_is_half_open() {
        let window = CleanupWindow::default();
        assert!(!window.is_due(at(2, 59, 59)));
        assert!(window.is_due(at(3, 0, 0)));
        assert!(window.is_due(at(3, 4, 59)));
        assert!(!window.is_due(at(3, 5, 0)));
    }

    #[test]
    fn cleanup_window_across_midnight() {
        let window = CleanupWindow {
            hour: 23,
            minute: 58,
            ..CleanupWindow::default()
        };
        assert!(window.is_due(at(23, 59, 0)));
        assert!(window.is_due(at(0, 2, 0)));
        assert!(!window.is_due(at(0, 3, 0)));
    }

    #[test]
    fn disabled_cleanup_is_never_due() {
        let window = CleanupWindow {
            enabled: false,
            ..CleanupWindow::default()
        };
        assert!(!window.is_due(at(3, 1, 0)));
    }

    #[test]
    fn retention_cutoff_uses_calendar_months() {
        let window = CleanupWindow::default();
        // 2026-03-31 minus 13 months clamps to the end of February 2025.
        assert_eq!(
            window.cutoff(at(3, 0, 0)),
            Some(Utc.with_ymd_and_hms(2025, 2, 28, 3, 0, 0).unwrap())
        );
    }
}
