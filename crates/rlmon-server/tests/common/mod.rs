#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rlmon_common::types::{Policy, PolicyState, PspCategory};
use rlmon_notify::{AlertLifecycleEvent, EventPublisher, NotifyError};
use rlmon_server::metrics::NoopExporter;
use rlmon_server::monitor::{MonitorPipeline, PipelineDeps, PipelineSettings, RetryPolicy};
use rlmon_storage::{AlertStore, MemoryStore, PolicyStore, StateStore};
use rlmon_upstream::{DirectoryClient, PolicyListing, UpstreamError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const ENDPOINT: &str = "entries.get";
pub const CAPACITY: i64 = 36000;

/// Errors the fake directory can be told to return. `UpstreamError` is not
/// `Clone`, so scripts hold these and build a fresh error per call.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Unavailable,
    PermissionDenied,
    Unauthenticated,
    NotFound,
}

impl Failure {
    fn to_error(self) -> UpstreamError {
        match self {
            Failure::Unavailable => UpstreamError::Unavailable("scripted".into()),
            Failure::PermissionDenied => UpstreamError::PermissionDenied("scripted".into()),
            Failure::Unauthenticated => UpstreamError::Unauthenticated("scripted".into()),
            Failure::NotFound => UpstreamError::NotFound("scripted".into()),
        }
    }
}

#[derive(Default)]
struct Script {
    policies: Vec<Policy>,
    states: HashMap<String, (i64, DateTime<Utc>)>,
    list_failures: VecDeque<Failure>,
    state_failures: HashMap<String, Failure>,
    list_delay: Option<std::time::Duration>,
}

/// Scripted [`DirectoryClient`]. Each policy reports whatever bucket level
/// was last set for it.
#[derive(Default)]
pub struct FakeDirectory {
    script: Mutex<Script>,
    list_calls: AtomicU32,
    state_calls: AtomicU32,
}

impl FakeDirectory {
    pub fn with_policies(policies: Vec<Policy>) -> Self {
        let directory = Self::default();
        directory.lock().policies = policies;
        directory
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_level(&self, endpoint_id: &str, available: i64, observed_at: DateTime<Utc>) {
        self.lock()
            .states
            .insert(endpoint_id.to_string(), (available, observed_at));
    }

    pub fn fail_list(&self, failures: &[Failure]) {
        self.lock().list_failures.extend(failures.iter().copied());
    }

    pub fn fail_state(&self, endpoint_id: &str, failure: Failure) {
        self.lock()
            .state_failures
            .insert(endpoint_id.to_string(), failure);
    }

    pub fn delay_list(&self, delay: std::time::Duration) {
        self.lock().list_delay = Some(delay);
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn state_calls(&self) -> u32 {
        self.state_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn list_policies(&self) -> rlmon_upstream::Result<PolicyListing> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.lock().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.lock();
        if let Some(failure) = script.list_failures.pop_front() {
            return Err(failure.to_error());
        }
        Ok(PolicyListing {
            policies: script.policies.clone(),
            psp_category: Some(PspCategory::B),
        })
    }

    async fn get_state(&self, endpoint_id: &str) -> rlmon_upstream::Result<PolicyState> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.lock();
        if let Some(failure) = script.state_failures.get(endpoint_id) {
            return Err(failure.to_error());
        }
        let policy = script
            .policies
            .iter()
            .find(|p| p.endpoint_id == endpoint_id)
            .ok_or_else(|| UpstreamError::NotFound(endpoint_id.to_string()))?;
        let (available, observed_at) = script
            .states
            .get(endpoint_id)
            .copied()
            .unwrap_or((policy.capacity, base_time()));
        PolicyState::new(
            endpoint_id,
            available,
            policy.capacity,
            policy.refill_tokens,
            policy.refill_period_sec,
            policy.psp_category,
            observed_at,
        )
        .map_err(|source| UpstreamError::Invalid {
            endpoint_id: endpoint_id.to_string(),
            source,
        })
    }
}

/// Keeps every event it is handed; can be switched to fail.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<AlertLifecycleEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<AlertLifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &AlertLifecycleEvent) -> rlmon_notify::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Other("sink down".into()));
        }
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap()
}

/// Tick times five minutes apart, well outside the cleanup window.
pub fn tick_time(n: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(5 * n)
}

pub fn policy(endpoint_id: &str) -> Policy {
    Policy::new(
        endpoint_id,
        "/entries/{key}",
        "GET",
        CAPACITY,
        1200,
        60,
        Some(PspCategory::B),
    )
    .unwrap()
}

pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::default(),
        tick_timeout: std::time::Duration::from_secs(240),
        stage_timeout: std::time::Duration::from_secs(60),
        concurrency: 4,
        ..PipelineSettings::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub directory: Arc<FakeDirectory>,
    pub publisher: Arc<RecordingPublisher>,
    pub pipeline: MonitorPipeline,
}

pub fn harness(policies: Vec<Policy>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_with_states(policies, store.clone(), store)
}

/// Like [`harness`], with the state store swapped out.
pub fn harness_with_states(
    policies: Vec<Policy>,
    store: Arc<MemoryStore>,
    states: Arc<dyn StateStore>,
) -> Harness {
    let alerts: Arc<dyn AlertStore> = store.clone();
    harness_with_stores(policies, store, states, alerts)
}

/// Like [`harness`], with the alert store swapped out.
pub fn harness_with_alerts(
    policies: Vec<Policy>,
    store: Arc<MemoryStore>,
    alerts: Arc<dyn AlertStore>,
) -> Harness {
    let states: Arc<dyn StateStore> = store.clone();
    harness_with_stores(policies, store, states, alerts)
}

fn harness_with_stores(
    policies: Vec<Policy>,
    store: Arc<MemoryStore>,
    states: Arc<dyn StateStore>,
    alert_store: Arc<dyn AlertStore>,
) -> Harness {
    let directory = Arc::new(FakeDirectory::with_policies(policies));
    let publisher = Arc::new(RecordingPublisher::default());
    let policy_store: Arc<dyn PolicyStore> = store.clone();
    let pipeline = MonitorPipeline::new(
        PipelineDeps {
            policies: policy_store,
            states,
            alerts: alert_store,
            directory: directory.clone(),
            publisher: publisher.clone(),
            metrics: Arc::new(NoopExporter),
        },
        fast_settings(),
    );
    Harness {
        store,
        directory,
        publisher,
        pipeline,
    }
}
