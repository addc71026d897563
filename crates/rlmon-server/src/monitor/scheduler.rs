use super::pipeline::MonitorPipeline;
use super::report::TickReport;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Shared slot holding the most recent tick report.
pub type LastReport = Arc<RwLock<Option<TickReport>>>;

/// Drives the pipeline on a fixed cadence.
///
/// Ticks run sequentially in one task, so at most one is in flight. A tick
/// that overruns the period makes the scheduler skip the missed slots
/// rather than fire them back to back.
pub struct MonitorScheduler {
    pipeline: Arc<MonitorPipeline>,
    tick_secs: u64,
    last_report: LastReport,
}

impl MonitorScheduler {
    pub fn new(pipeline: Arc<MonitorPipeline>, tick_secs: u64) -> Self {
        Self {
            pipeline,
            tick_secs,
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    pub fn last_report(&self) -> LastReport {
        self.last_report.clone()
    }

    pub async fn run(&self) {
        tracing::info!(tick_secs = self.tick_secs, "Monitoring scheduler started");

        let mut tick = interval(Duration::from_secs(self.tick_secs.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) -> TickReport {
        let report = self.pipeline.run_tick(Utc::now()).await;
        *self.last_report.write().await = Some(report.clone());
        report
    }
}
