//! Rate-limit health evaluation.
//!
//! [`calculator`] derives consumption, recovery and exhaustion metrics from a
//! snapshot and its predecessor, [`threshold`] classifies a snapshot as
//! OK / WARNING / CRITICAL and owns the hysteresis rules, and [`lifecycle`]
//! turns violations into persisted alerts and retires them once the bucket
//! recovers. The first two are pure; only the lifecycle manager talks to a
//! store.

pub mod calculator;
pub mod lifecycle;
pub mod threshold;


pub use lifecycle::{AlertLifecycle, AlertOutcome, LifecycleError, SkipReason, Violation};
