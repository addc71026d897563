use crate::metrics::PrometheusExporter;
use crate::monitor::scheduler::LastReport;
use crate::monitor::TickPhase;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub start_time: DateTime<Utc>,
    pub exporter: Arc<PrometheusExporter>,
    pub last_report: LastReport,
    pub phase: watch::Receiver<TickPhase>,
}
