use rlmon_common::error::{RateLimitError, Result};
use rlmon_common::types::PolicyState;

/// What [`enrich`] managed to derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Enrichment {
    /// False when there was no predecessor to derive a rate from.
    pub consumption_rate_known: bool,
    pub category_changed: bool,
}

/// Tokens consumed per minute between `previous` and `current`, measured on
/// the upstream response timestamps.
///
/// Net refill yields `0.0`, never a negative rate.
///
/// # Errors
///
/// [`RateLimitError::InsufficientData`] without a predecessor,
/// [`RateLimitError::DivisionByZero`] when no time elapsed.
pub fn consumption_rate(current: &PolicyState, previous: Option<&PolicyState>) -> Result<f64> {
    let previous = previous.ok_or(RateLimitError::InsufficientData)?;

    let elapsed = current.response_timestamp - previous.response_timestamp;
    // Sub-millisecond gaps still count.
    let elapsed_minutes = match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 60_000_000.0,
        None => elapsed.num_milliseconds() as f64 / 60_000.0,
    };
    if elapsed_minutes <= 0.0 {
        return Err(RateLimitError::DivisionByZero);
    }

    let consumed = (previous.available_tokens - current.available_tokens) as f64;
    Ok((consumed / elapsed_minutes).max(0.0))
}

/// Whole seconds until the bucket is full again at the configured refill
/// rate. `0` when already full.
pub fn recovery_eta(state: &PolicyState) -> Result<i64> {
    if state.capacity <= 0 {
        return Err(RateLimitError::InvalidCapacity);
    }
    if state.refill_tokens <= 0 || state.refill_period_sec <= 0 {
        return Err(RateLimitError::InvalidRefillRate);
    }
    if state.available_tokens >= state.capacity {
        return Ok(0);
    }

    let missing = (state.capacity - state.available_tokens) as f64;
    Ok((missing / state.refill_rate()) as i64)
}

/// Whole seconds until the bucket empties if the current consumption rate
/// holds. `0` when nothing is being consumed or the bucket is already empty.
pub fn exhaustion_projection(state: &PolicyState) -> Result<i64> {
    if state.consumption_rate_per_minute <= 0.0 || state.available_tokens <= 0 {
        return Ok(0);
    }
    let per_second = state.consumption_rate_per_minute / 60.0;
    if per_second <= 0.0 {
        return Err(RateLimitError::DivisionByZero);
    }
    Ok((state.available_tokens as f64 / per_second) as i64)
}

/// Placeholder: request history is not tracked, so the 404 rate is always 0.
pub fn error_404_rate() -> f64 {
    0.0
}

/// True when the PSP category differs from the predecessor's. Two unset
/// categories are not a change.
pub fn detect_category_change(current: &PolicyState, previous: Option<&PolicyState>) -> bool {
    match previous {
        Some(prev) => current.psp_category != prev.psp_category,
        None => false,
    }
}

/// Fills the calculated fields of `current` in place.
///
/// A missing predecessor leaves the consumption rate untouched; every other
/// calculation error is returned.
pub fn enrich(current: &mut PolicyState, previous: Option<&PolicyState>) -> Result<Enrichment> {
    let mut report = Enrichment {
        category_changed: detect_category_change(current, previous),
        ..Enrichment::default()
    };

    match consumption_rate(current, previous) {
        Ok(rate) => {
            current.consumption_rate_per_minute = rate;
            report.consumption_rate_known = true;
        }
        Err(RateLimitError::InsufficientData) => {}
        Err(e) => return Err(e),
    }

    current.recovery_eta_seconds = recovery_eta(current)?;

    current.exhaustion_projection_seconds = if current.consumption_rate_per_minute > 0.0 {
        exhaustion_projection(current)?
    } else {
        0
    };

    current.error_404_rate = error_404_rate();
    Ok(report)
}
