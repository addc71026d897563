use chrono::{DateTime, Utc};
use serde::Serialize;

/// The seven stages of a tick, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Enrich,
    Classify,
    Alert,
    Publish,
    AutoResolve,
    Cleanup,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Enrich => "enrich",
            Stage::Classify => "classify",
            Stage::Alert => "alert",
            Stage::Publish => "publish",
            Stage::AutoResolve => "auto_resolve",
            Stage::Cleanup => "cleanup",
        }
    }

    /// A critical stage failure aborts the tick.
    pub fn is_critical(&self) -> bool {
        matches!(self, Stage::Fetch | Stage::Classify)
    }

    pub fn phase(&self) -> TickPhase {
        match self {
            Stage::Fetch => TickPhase::Fetching,
            Stage::Enrich => TickPhase::Enriching,
            Stage::Classify => TickPhase::Classifying,
            Stage::Alert => TickPhase::Alerting,
            Stage::Publish => TickPhase::Publishing,
            Stage::AutoResolve => TickPhase::AutoResolving,
            Stage::Cleanup => TickPhase::Cleaning,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the pipeline currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    #[default]
    Idle,
    Fetching,
    Enriching,
    Classifying,
    Alerting,
    Publishing,
    AutoResolving,
    Cleaning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Finished, but some per-endpoint work failed.
    Degraded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickOutcome {
    Succeeded,
    Failed { stage: Stage, error: String },
}

/// Structured result of one tick, produced even when the tick fails so a
/// consumer can tell "no violations" from "pipeline degraded".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: TickOutcome,
    pub stages: Vec<StageReport>,

    pub policies_fetched: usize,
    pub states_fetched: usize,
    pub state_fetch_failures: usize,
    pub states_enriched: usize,
    pub enrich_failures: usize,

    pub ok_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,

    pub alerts_created: usize,
    pub alerts_skipped: usize,
    pub alert_failures: usize,
    pub events_published: usize,
    pub publish_failures: usize,
    pub alerts_resolved: usize,
    pub resolve_failures: usize,
    pub states_purged: u64,
}

impl TickReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            outcome: TickOutcome::Succeeded,
            stages: Vec::new(),
            policies_fetched: 0,
            states_fetched: 0,
            state_fetch_failures: 0,
            states_enriched: 0,
            enrich_failures: 0,
            ok_count: 0,
            warning_count: 0,
            critical_count: 0,
            alerts_created: 0,
            alerts_skipped: 0,
            alert_failures: 0,
            events_published: 0,
            publish_failures: 0,
            alerts_resolved: 0,
            resolve_failures: 0,
            states_purged: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TickOutcome::Succeeded)
    }

    /// True when any stage only partly succeeded, or a non-critical stage
    /// failed outright.
    pub fn is_degraded(&self) -> bool {
        self.stages.iter().any(|s| match s.status {
            StageStatus::Degraded => true,
            StageStatus::Failed => !s.stage.is_critical(),
            StageStatus::Succeeded | StageStatus::Skipped => false,
        })
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Downgrades a succeeded stage whose per-endpoint work partly failed.
    pub fn mark_degraded(&mut self, stage: Stage, error: String) {
        if let Some(entry) = self
            .stages
            .iter_mut()
            .find(|s| s.stage == stage && s.status == StageStatus::Succeeded)
        {
            entry.status = StageStatus::Degraded;
            entry.error = Some(error);
        }
    }
}
