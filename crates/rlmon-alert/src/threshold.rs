use rlmon_common::types::{compare_remaining, PolicyState, Severity, ThresholdStatus};
use serde::Serialize;

/// Remaining-capacity percentage at or below which WARNING fires.
pub const WARNING_THRESHOLD_PERCENT: i64 = 20;
/// Remaining-capacity percentage at or below which CRITICAL fires.
pub const CRITICAL_THRESHOLD_PERCENT: i64 = 10;

/// Classifies a bucket by its remaining percentage.
///
/// Boundaries are inclusive and computed on integers, so exactly 20%
/// remaining is WARNING and exactly 10% is CRITICAL.
///
/// # Examples
///
/// ```
/// use rlmon_alert::threshold::classify;
/// use rlmon_common::types::ThresholdStatus;
///
/// assert_eq!(classify(7200, 36000), ThresholdStatus::Warning);
/// assert_eq!(classify(7201, 36000), ThresholdStatus::Ok);
/// assert_eq!(classify(3600, 36000), ThresholdStatus::Critical);
/// ```
pub fn classify(available: i64, capacity: i64) -> ThresholdStatus {
    if compare_remaining(available, capacity, CRITICAL_THRESHOLD_PERCENT).is_le() {
        ThresholdStatus::Critical
    } else if compare_remaining(available, capacity, WARNING_THRESHOLD_PERCENT).is_le() {
        ThresholdStatus::Warning
    } else {
        ThresholdStatus::Ok
    }
}

pub fn analyze(state: &PolicyState) -> ThresholdStatus {
    classify(state.available_tokens, state.capacity)
}

pub fn should_create_alert(state: &PolicyState) -> bool {
    analyze(state) != ThresholdStatus::Ok
}

pub fn alert_severity(state: &PolicyState) -> Option<Severity> {
    analyze(state).severity()
}

/// Hysteresis exit condition for an open alert of `severity`.
///
/// WARNING clears once utilization is strictly below 80%, CRITICAL once it
/// is strictly below 90%.
pub fn should_resolve(severity: Severity, available: i64, capacity: i64) -> bool {
    compare_remaining(available, capacity, severity.threshold_percent()).is_gt()
}

/// Every severity whose open alerts may be resolved at this fill level.
pub fn resolvable_severities(available: i64, capacity: i64) -> Vec<Severity> {
    [Severity::Warning, Severity::Critical]
        .into_iter()
        .filter(|s| should_resolve(*s, available, capacity))
        .collect()
}

/// `capacity * percent / 100`, truncated, saturating at the `i64` range.
pub fn threshold_tokens(capacity: i64, percent: i64) -> i64 {
    let tokens = i128::from(capacity) * i128::from(percent) / 100;
    i64::try_from(tokens).unwrap_or(if tokens < 0 { i64::MIN } else { i64::MAX })
}

pub fn warning_threshold_tokens(capacity: i64) -> i64 {
    threshold_tokens(capacity, WARNING_THRESHOLD_PERCENT)
}

pub fn critical_threshold_tokens(capacity: i64) -> i64 {
    threshold_tokens(capacity, CRITICAL_THRESHOLD_PERCENT)
}

/// Per-status counts over one classification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThresholdSummary {
    pub ok: usize,
    pub warning: usize,
    pub critical: usize,
}

impl ThresholdSummary {
    pub fn record(&mut self, status: ThresholdStatus) {
        match status {
            ThresholdStatus::Ok => self.ok += 1,
            ThresholdStatus::Warning => self.warning += 1,
            ThresholdStatus::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.warning + self.critical
    }
}
