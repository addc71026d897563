use crate::error::{RateLimitError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Participant category an endpoint's rate limit applies to.
///
/// A policy without a category applies to every category and is modelled as
/// `Option::<PspCategory>::None`.
///
/// # Examples
///
/// ```
/// use rlmon_common::types::PspCategory;
///
/// let cat: PspCategory = "c".parse().unwrap();
/// assert_eq!(cat, PspCategory::C);
/// assert_eq!(cat.to_string(), "C");
/// assert!("Z".parse::<PspCategory>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PspCategory {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl PspCategory {
    pub const ALL: [PspCategory; 8] = [
        PspCategory::A,
        PspCategory::B,
        PspCategory::C,
        PspCategory::D,
        PspCategory::E,
        PspCategory::F,
        PspCategory::G,
        PspCategory::H,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PspCategory::A => "A",
            PspCategory::B => "B",
            PspCategory::C => "C",
            PspCategory::D => "D",
            PspCategory::E => "E",
            PspCategory::F => "F",
            PspCategory::G => "G",
            PspCategory::H => "H",
        }
    }

    /// Parses an optional wire value; empty strings mean "no category".
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<PspCategory>> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(code) => code.parse().map(Some),
        }
    }
}

impl std::fmt::Display for PspCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PspCategory {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        PspCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or(RateLimitError::InvalidCategory)
    }
}

/// Alert severity, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use rlmon_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.to_string(), "WARNING");
/// assert_eq!(sev.threshold_percent(), 20);
/// assert!(Severity::Critical > Severity::Warning);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    /// Remaining-capacity percentage at or below which this severity fires.
    pub fn threshold_percent(&self) -> i64 {
        match self {
            Severity::Warning => 20,
            Severity::Critical => 10,
        }
    }

    /// Minimum utilization an alert of this severity must carry.
    pub fn min_utilization_percent(&self) -> i64 {
        100 - self.threshold_percent()
    }

    pub fn from_threshold_percent(percent: i64) -> Result<Self> {
        match percent {
            20 => Ok(Severity::Warning),
            10 => Ok(Severity::Critical),
            _ => Err(RateLimitError::InvalidThreshold),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(RateLimitError::InvalidSeverity),
        }
    }
}

/// Health of a token bucket. Always derived from a snapshot, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThresholdStatus {
    Ok,
    Warning,
    Critical,
}

impl ThresholdStatus {
    pub fn severity(&self) -> Option<Severity> {
        match self {
            ThresholdStatus::Ok => None,
            ThresholdStatus::Warning => Some(Severity::Warning),
            ThresholdStatus::Critical => Some(Severity::Critical),
        }
    }
}

impl std::fmt::Display for ThresholdStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdStatus::Ok => write!(f, "OK"),
            ThresholdStatus::Warning => write!(f, "WARNING"),
            ThresholdStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Compares `available/capacity` against `percent`% without rounding.
///
/// The products are taken in `i128`, so any pair of `i64` token counts is
/// compared exactly.
pub fn compare_remaining(available: i64, capacity: i64, percent: i64) -> Ordering {
    (i128::from(available) * 100).cmp(&(i128::from(capacity) * i128::from(percent)))
}

/// True when `available/capacity` sits inside the band that `severity`
/// fires for. Integer arithmetic keeps exact boundaries exact.
pub fn within_severity_band(severity: Severity, available: i64, capacity: i64) -> bool {
    capacity > 0 && compare_remaining(available, capacity, severity.threshold_percent()).is_le()
}

fn check_refill(refill_tokens: i64, refill_period_sec: i64) -> Result<()> {
    if refill_tokens <= 0 || refill_period_sec <= 0 {
        return Err(RateLimitError::InvalidRefillRate);
    }
    Ok(())
}

fn utilization(available: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 0.0;
    }
    100.0 - (available as f64 / capacity as f64 * 100.0)
}

/// Static token-bucket configuration for one rate-limited endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub endpoint_id: String,
    pub endpoint_path: String,
    pub http_method: String,
    pub capacity: i64,
    pub refill_tokens: i64,
    pub refill_period_sec: i64,
    pub psp_category: Option<PspCategory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(
        endpoint_id: impl Into<String>,
        endpoint_path: impl Into<String>,
        http_method: impl Into<String>,
        capacity: i64,
        refill_tokens: i64,
        refill_period_sec: i64,
        psp_category: Option<PspCategory>,
    ) -> Result<Self> {
        if capacity <= 0 {
            return Err(RateLimitError::InvalidCapacity);
        }
        check_refill(refill_tokens, refill_period_sec)?;

        let now = Utc::now();
        Ok(Self {
            endpoint_id: endpoint_id.into(),
            endpoint_path: endpoint_path.into(),
            http_method: http_method.into(),
            capacity,
            refill_tokens,
            refill_period_sec,
            psp_category,
            created_at: now,
            updated_at: now,
        })
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        if self.refill_period_sec == 0 {
            return 0.0;
        }
        self.refill_tokens as f64 / self.refill_period_sec as f64
    }

    /// Re-checks a value that did not come through [`Policy::new`].
    pub fn validate(&self) -> Result<()> {
        if self.capacity <= 0 {
            return Err(RateLimitError::validation(
                "capacity",
                self.capacity,
                "must be greater than zero",
            ));
        }
        if self.refill_tokens <= 0 {
            return Err(RateLimitError::validation(
                "refill_tokens",
                self.refill_tokens,
                "must be greater than zero",
            ));
        }
        if self.refill_period_sec <= 0 {
            return Err(RateLimitError::validation(
                "refill_period_sec",
                self.refill_period_sec,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// One observation of an endpoint's token bucket.
///
/// Refill parameters and category are copied from the policy at snapshot
/// time since they may drift. The four calculated fields start at zero and
/// are filled in once by enrichment. `response_timestamp` comes from the
/// upstream and drives rate arithmetic; `created_at` is the ingestion time
/// used for ordering and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    pub id: String,
    pub endpoint_id: String,
    pub available_tokens: i64,
    pub capacity: i64,
    pub refill_tokens: i64,
    pub refill_period_sec: i64,
    pub psp_category: Option<PspCategory>,
    pub consumption_rate_per_minute: f64,
    pub recovery_eta_seconds: i64,
    pub exhaustion_projection_seconds: i64,
    pub error_404_rate: f64,
    pub response_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PolicyState {
    /// Builds a validated snapshot stamped with a fresh ID and `created_at = now`.
    ///
    /// Tokens outside `0..=capacity` are rejected rather than clamped.
    pub fn new(
        endpoint_id: impl Into<String>,
        available_tokens: i64,
        capacity: i64,
        refill_tokens: i64,
        refill_period_sec: i64,
        psp_category: Option<PspCategory>,
        response_timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        if available_tokens < 0 {
            return Err(RateLimitError::NegativeTokens);
        }
        if available_tokens > capacity {
            return Err(RateLimitError::TokensExceedCapacity);
        }
        if capacity <= 0 {
            return Err(RateLimitError::InvalidCapacity);
        }
        check_refill(refill_tokens, refill_period_sec)?;

        Ok(Self {
            id: crate::id::next_id(),
            endpoint_id: endpoint_id.into(),
            available_tokens,
            capacity,
            refill_tokens,
            refill_period_sec,
            psp_category,
            consumption_rate_per_minute: 0.0,
            recovery_eta_seconds: 0,
            exhaustion_projection_seconds: 0,
            error_404_rate: 0.0,
            response_timestamp,
            created_at: Utc::now(),
        })
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// `100 - remaining_percent()`.
    pub fn utilization_percent(&self) -> f64 {
        utilization(self.available_tokens, self.capacity)
    }

    pub fn remaining_percent(&self) -> f64 {
        if self.capacity <= 0 {
            return 0.0;
        }
        self.available_tokens as f64 / self.capacity as f64 * 100.0
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        if self.refill_period_sec == 0 {
            return 0.0;
        }
        self.refill_tokens as f64 / self.refill_period_sec as f64
    }

    pub fn validate(&self) -> Result<()> {
        if self.available_tokens < 0 {
            return Err(RateLimitError::validation(
                "available_tokens",
                self.available_tokens,
                "cannot be negative",
            ));
        }
        if self.available_tokens > self.capacity {
            return Err(RateLimitError::validation(
                "available_tokens",
                self.available_tokens,
                "cannot exceed capacity",
            ));
        }
        if self.capacity <= 0 {
            return Err(RateLimitError::validation(
                "capacity",
                self.capacity,
                "must be greater than zero",
            ));
        }
        if self.refill_tokens <= 0 {
            return Err(RateLimitError::validation(
                "refill_tokens",
                self.refill_tokens,
                "must be greater than zero",
            ));
        }
        if self.refill_period_sec <= 0 {
            return Err(RateLimitError::validation(
                "refill_period_sec",
                self.refill_period_sec,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// A raised threshold violation.
///
/// Carries a copy of the triggering snapshot's metrics so the alert stays
/// meaningful after the snapshot is purged. Alerts are never deleted; they
/// are only marked resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub endpoint_id: String,
    pub severity: Severity,
    pub threshold_percent: i64,
    pub available_tokens: i64,
    pub capacity: i64,
    pub utilization_percent: f64,
    pub consumption_rate_per_minute: f64,
    pub recovery_eta_seconds: i64,
    pub exhaustion_projection_seconds: i64,
    pub psp_category: Option<PspCategory>,
    pub message: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Builds an alert from the snapshot that triggered it.
    ///
    /// Fails with [`RateLimitError::SeverityMismatch`] when the snapshot is
    /// not inside the severity's band (WARNING needs at least 80% utilized,
    /// CRITICAL at least 90%).
    pub fn new(endpoint_id: &str, severity: Severity, state: &PolicyState) -> Result<Self> {
        if state.capacity <= 0 {
            return Err(RateLimitError::InvalidCapacity);
        }
        let utilization_percent = state.utilization_percent();
        if !within_severity_band(severity, state.available_tokens, state.capacity) {
            return Err(RateLimitError::SeverityMismatch {
                severity,
                required: severity.min_utilization_percent(),
                actual: utilization_percent,
            });
        }

        Ok(Self {
            id: crate::id::next_id(),
            endpoint_id: endpoint_id.to_string(),
            severity,
            threshold_percent: severity.threshold_percent(),
            available_tokens: state.available_tokens,
            capacity: state.capacity,
            utilization_percent,
            consumption_rate_per_minute: state.consumption_rate_per_minute,
            recovery_eta_seconds: state.recovery_eta_seconds,
            exhaustion_projection_seconds: state.exhaustion_projection_seconds,
            psp_category: state.psp_category,
            message: alert_message(endpoint_id, severity, state),
            resolved: false,
            resolved_at: None,
            resolution_notes: None,
            created_at: Utc::now(),
        })
    }

    pub fn resolve(&mut self, notes: impl Into<String>, at: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolution_notes = Some(notes.into());
    }

    pub fn validate(&self) -> Result<()> {
        if Severity::from_threshold_percent(self.threshold_percent)? != self.severity {
            return Err(RateLimitError::InvalidThreshold);
        }
        if self.available_tokens < 0 {
            return Err(RateLimitError::validation(
                "available_tokens",
                self.available_tokens,
                "cannot be negative",
            ));
        }
        if self.capacity <= 0 {
            return Err(RateLimitError::validation(
                "capacity",
                self.capacity,
                "must be greater than zero",
            ));
        }
        if !within_severity_band(self.severity, self.available_tokens, self.capacity) {
            return Err(RateLimitError::SeverityMismatch {
                severity: self.severity,
                required: self.severity.min_utilization_percent(),
                actual: utilization(self.available_tokens, self.capacity),
            });
        }
        Ok(())
    }
}

fn alert_message(endpoint_id: &str, severity: Severity, state: &PolicyState) -> String {
    format!(
        "[{severity}] Rate limit {severity} threshold breached: Endpoint {endpoint_id} has {}/{} tokens remaining ({:.2}% utilized). \
         Recovery ETA: {}s, Exhaustion projection: {}s, Consumption rate: {:.2} tokens/min",
        state.available_tokens,
        state.capacity,
        state.utilization_percent(),
        state.recovery_eta_seconds,
        state.exhaustion_projection_seconds,
        state.consumption_rate_per_minute,
    )
}
