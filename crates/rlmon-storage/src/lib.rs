//! Persistence collaborators for the rate-limit monitor.
//!
//! Three capabilities are exposed as traits: [`PolicyStore`], [`StateStore`]
//! and [`AlertStore`]. [`sqlite::SqliteStore`] implements all three on a
//! single SQLite file; [`memory::MemoryStore`] implements them in memory for
//! tests and embedding. Multi-row writes are atomic in both.

pub mod error;
pub mod memory;
pub mod sqlite;


pub use error::{Result, StorageError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rlmon_common::types::{Alert, Policy, PolicyState, PspCategory, Severity};

/// Token-bucket policies keyed by endpoint ID.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Policy>>;

    /// # Errors
    ///
    /// [`StorageError::NotFound`] when no policy exists for `endpoint_id`.
    async fn get_by_id(&self, endpoint_id: &str) -> Result<Policy>;

    /// Policies for `category` plus those without a category, which apply
    /// to every category.
    async fn get_by_category(&self, category: PspCategory) -> Result<Vec<Policy>>;

    /// Inserts or replaces by endpoint ID, keeping the original `created_at`.
    async fn upsert(&self, policy: &Policy) -> Result<()>;

    /// Upserts every policy in one transaction.
    async fn upsert_batch(&self, policies: &[Policy]) -> Result<()>;
}

/// Time-series of [`PolicyState`] snapshots, ordered by `created_at`.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn insert(&self, state: &PolicyState) -> Result<()>;

    /// Inserts every snapshot or none.
    async fn insert_batch(&self, states: &[PolicyState]) -> Result<()>;

    /// Writes the calculated fields of already-stored snapshots, all or none.
    /// Returns the number of rows updated.
    async fn update_metrics_batch(&self, states: &[PolicyState]) -> Result<u64>;

    async fn get_latest(&self, endpoint_id: &str) -> Result<Option<PolicyState>>;

    /// The most recent snapshot of every endpoint.
    async fn get_latest_all(&self) -> Result<Vec<PolicyState>>;

    /// Snapshots with `from <= created_at <= to`, oldest first.
    async fn get_history(
        &self,
        endpoint_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PolicyState>>;

    /// The latest snapshot with `created_at < before`.
    async fn get_previous_before(
        &self,
        endpoint_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<PolicyState>>;

    /// Deletes snapshots with `created_at < cutoff` (strictly before) and
    /// returns how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Raised alerts. Alerts are never deleted, only resolved.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: &Alert) -> Result<()>;

    async fn get_unresolved_all(&self) -> Result<Vec<Alert>>;

    async fn get_unresolved_by_endpoint(&self, endpoint_id: &str) -> Result<Vec<Alert>>;

    async fn get_unresolved_by_severity(&self, severity: Severity) -> Result<Vec<Alert>>;

    /// Resolves one alert. Resolving an already-resolved alert is a no-op.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] when `id` does not exist.
    async fn resolve(&self, id: &str, notes: &str, at: DateTime<Utc>) -> Result<()>;

    /// Resolves every listed unresolved alert in one transaction and
    /// returns how many changed.
    async fn resolve_bulk(&self, ids: &[String], notes: &str, at: DateTime<Utc>) -> Result<u64>;

    /// Atomically resolves every unresolved alert of `endpoint_id` whose
    /// severity is in `severities`, returning the rows it changed.
    ///
    /// This is one conditional update: concurrent callers never both
    /// resolve the same alert, and alerts already resolved are untouched.
    async fn auto_resolve(
        &self,
        endpoint_id: &str,
        severities: &[Severity],
        notes: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Alert>>;

    /// Alerts created in `[from, to]`, newest first.
    async fn get_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Alert>>;

    async fn get_history_by_endpoint(
        &self,
        endpoint_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Alert>>;
}
