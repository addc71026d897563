//! Prometheus export of bucket gauges, alert counters and stage timings.
//!
//! **Gauges** (`endpoint_id`, `psp_category`):
//! - `rlmon_available_tokens`, `rlmon_capacity`, `rlmon_utilization_percent`
//! - `rlmon_consumption_rate_per_minute`, `rlmon_recovery_eta_seconds`
//! - `rlmon_exhaustion_projection_seconds`, `rlmon_error_404_rate`
//!
//! **Counters** (`endpoint_id`, `severity`, `psp_category`):
//! - `rlmon_alerts_created_total`, `rlmon_alerts_resolved_total`
//!
//! **Histograms** (`operation`):
//! - `rlmon_monitoring_duration_seconds`

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use rlmon_common::types::{Alert, PolicyState, PspCategory};
use std::time::Duration;

/// Sink for monitoring measurements. Calls never fail; a broken exporter
/// must not fail a tick.
pub trait MetricsExporter: Send + Sync {
    fn record_state(&self, state: &PolicyState);
    fn alert_created(&self, alert: &Alert);
    fn alert_resolved(&self, alert: &Alert);
    fn observe_stage(&self, stage: &str, elapsed: Duration);
}

fn category_label(category: Option<PspCategory>) -> &'static str {
    category.map(|c| c.as_str()).unwrap_or("none")
}

#[derive(Clone)]
pub struct PrometheusExporter {
    registry: Registry,

    available_tokens: GaugeVec,
    capacity: GaugeVec,
    utilization_percent: GaugeVec,
    consumption_rate: GaugeVec,
    recovery_eta: GaugeVec,
    exhaustion_projection: GaugeVec,
    error_404_rate: GaugeVec,

    alerts_created: IntCounterVec,
    alerts_resolved: IntCounterVec,

    monitoring_duration: HistogramVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let state_labels = &["endpoint_id", "psp_category"];
        let alert_labels = &["endpoint_id", "severity", "psp_category"];

        let gauge = |name: &str, help: &str| -> Result<GaugeVec, prometheus::Error> {
            let g = GaugeVec::new(Opts::new(name, help), state_labels)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };

        let available_tokens = gauge("rlmon_available_tokens", "Tokens left in the bucket")?;
        let capacity = gauge("rlmon_capacity", "Bucket capacity")?;
        let utilization_percent = gauge(
            "rlmon_utilization_percent",
            "Share of the bucket consumed, in percent",
        )?;
        let consumption_rate = gauge(
            "rlmon_consumption_rate_per_minute",
            "Tokens consumed per minute since the previous snapshot",
        )?;
        let recovery_eta = gauge(
            "rlmon_recovery_eta_seconds",
            "Seconds until the bucket is full at the refill rate",
        )?;
        let exhaustion_projection = gauge(
            "rlmon_exhaustion_projection_seconds",
            "Seconds until the bucket empties at the current consumption rate",
        )?;
        let error_404_rate = gauge("rlmon_error_404_rate", "Share of requests answered 404")?;

        let alerts_created = IntCounterVec::new(
            Opts::new("rlmon_alerts_created_total", "Alerts raised"),
            alert_labels,
        )?;
        registry.register(Box::new(alerts_created.clone()))?;

        let alerts_resolved = IntCounterVec::new(
            Opts::new("rlmon_alerts_resolved_total", "Alerts auto-resolved"),
            alert_labels,
        )?;
        registry.register(Box::new(alerts_resolved.clone()))?;

        let monitoring_duration = HistogramVec::new(
            HistogramOpts::new(
                "rlmon_monitoring_duration_seconds",
                "Duration of monitoring pipeline stages in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["operation"],
        )?;
        registry.register(Box::new(monitoring_duration.clone()))?;

        Ok(Self {
            registry,
            available_tokens,
            capacity,
            utilization_percent,
            consumption_rate,
            recovery_eta,
            exhaustion_projection,
            error_404_rate,
            alerts_created,
            alerts_resolved,
            monitoring_duration,
        })
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl MetricsExporter for PrometheusExporter {
    fn record_state(&self, state: &PolicyState) {
        let labels = [state.endpoint_id.as_str(), category_label(state.psp_category)];
        self.available_tokens
            .with_label_values(&labels)
            .set(state.available_tokens as f64);
        self.capacity
            .with_label_values(&labels)
            .set(state.capacity as f64);
        self.utilization_percent
            .with_label_values(&labels)
            .set(state.utilization_percent());
        self.consumption_rate
            .with_label_values(&labels)
            .set(state.consumption_rate_per_minute);
        self.recovery_eta
            .with_label_values(&labels)
            .set(state.recovery_eta_seconds as f64);
        self.exhaustion_projection
            .with_label_values(&labels)
            .set(state.exhaustion_projection_seconds as f64);
        self.error_404_rate
            .with_label_values(&labels)
            .set(state.error_404_rate);
    }

    fn alert_created(&self, alert: &Alert) {
        self.alerts_created
            .with_label_values(&[
                alert.endpoint_id.as_str(),
                alert.severity.as_str(),
                category_label(alert.psp_category),
            ])
            .inc();
    }

    fn alert_resolved(&self, alert: &Alert) {
        self.alerts_resolved
            .with_label_values(&[
                alert.endpoint_id.as_str(),
                alert.severity.as_str(),
                category_label(alert.psp_category),
            ])
            .inc();
    }

    fn observe_stage(&self, stage: &str, elapsed: Duration) {
        self.monitoring_duration
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

impl MetricsExporter for NoopExporter {
    fn record_state(&self, _state: &PolicyState) {}
    fn alert_created(&self, _alert: &Alert) {}
    fn alert_resolved(&self, _alert: &Alert) {}
    fn observe_stage(&self, _stage: &str, _elapsed: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rlmon_common::types::Severity;

    fn state(available: i64, category: Option<PspCategory>) -> PolicyState {
        PolicyState::new("entries.get", available, 36000, 1200, 60, category, Utc::now()).unwrap()
    }

    #[test]
    fn state_gauges_are_labelled_by_endpoint_and_category() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.record_state(&state(3000, Some(PspCategory::C)));

        let text = exporter.render().unwrap();
        assert!(text.contains(
            r#"rlmon_available_tokens{endpoint_id="entries.get",psp_category="C"} 3000"#
        ));
        assert!(text.contains(r#"rlmon_capacity{endpoint_id="entries.get",psp_category="C"} 36000"#));
        assert!(text.contains("rlmon_error_404_rate"));
    }

    #[test]
    fn unset_category_is_labelled_none() {
        let exporter = PrometheusExporter::new().unwrap();
        let snapshot = state(3000, None);
        exporter.record_state(&snapshot);
        let alert = Alert::new("entries.get", Severity::Critical, &snapshot).unwrap();
        exporter.alert_created(&alert);
        exporter.alert_created(&alert);
        exporter.alert_resolved(&alert);

        let text = exporter.render().unwrap();
        assert!(text.contains(
            r#"rlmon_alerts_created_total{endpoint_id="entries.get",psp_category="none",severity="CRITICAL"} 2"#
        ));
        assert!(text.contains(
            r#"rlmon_alerts_resolved_total{endpoint_id="entries.get",psp_category="none",severity="CRITICAL"} 1"#
        ));
    }

    #[test]
    fn stage_durations_are_observed() {
        let exporter = PrometheusExporter::new().unwrap();
        exporter.observe_stage("fetch", Duration::from_millis(30));
        let text = exporter.render().unwrap();
        assert!(text.contains(r#"rlmon_monitoring_duration_seconds_count{operation="fetch"} 1"#));
        assert!(text.contains(r#"rlmon_monitoring_duration_seconds_bucket{operation="fetch",le="0.05"} 1"#));
    }
}
