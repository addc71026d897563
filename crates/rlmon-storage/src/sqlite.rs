use crate::error::{Result, StorageError};
use crate::{AlertStore, PolicyStore, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rlmon_common::types::{Alert, Policy, PolicyState, PspCategory, Severity};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rate_limit_policies (
    endpoint_id TEXT PRIMARY KEY,
    endpoint_path TEXT NOT NULL,
    http_method TEXT NOT NULL,
    capacity INTEGER NOT NULL,
    refill_tokens INTEGER NOT NULL,
    refill_period_sec INTEGER NOT NULL,
    psp_category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_policies_category
    ON rate_limit_policies(psp_category);

CREATE TABLE IF NOT EXISTS rate_limit_states (
    id TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL,
    available_tokens INTEGER NOT NULL,
    capacity INTEGER NOT NULL,
    refill_tokens INTEGER NOT NULL,
    refill_period_sec INTEGER NOT NULL,
    psp_category TEXT,
    consumption_rate_per_minute REAL NOT NULL DEFAULT 0,
    recovery_eta_seconds INTEGER NOT NULL DEFAULT 0,
    exhaustion_projection_seconds INTEGER NOT NULL DEFAULT 0,
    error_404_rate REAL NOT NULL DEFAULT 0,
    response_timestamp TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_states_endpoint_created
    ON rate_limit_states(endpoint_id, created_at);
CREATE INDEX IF NOT EXISTS idx_states_created
    ON rate_limit_states(created_at);

CREATE TABLE IF NOT EXISTS rate_limit_alerts (
    id TEXT PRIMARY KEY,
    endpoint_id TEXT NOT NULL,
    severity TEXT NOT NULL,
    threshold_percent INTEGER NOT NULL,
    available_tokens INTEGER NOT NULL,
    capacity INTEGER NOT NULL,
    utilization_percent REAL NOT NULL,
    consumption_rate_per_minute REAL NOT NULL,
    recovery_eta_seconds INTEGER NOT NULL,
    exhaustion_projection_seconds INTEGER NOT NULL,
    psp_category TEXT,
    message TEXT NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at TEXT,
    resolution_notes TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_endpoint_resolved
    ON rate_limit_alerts(endpoint_id, resolved);
CREATE INDEX IF NOT EXISTS idx_alerts_created
    ON rate_limit_alerts(created_at);
";

const POLICY_COLUMNS: &str = "endpoint_id, endpoint_path, http_method, capacity, refill_tokens, \
     refill_period_sec, psp_category, created_at, updated_at";

const STATE_COLUMNS: &str = "id, endpoint_id, available_tokens, capacity, refill_tokens, \
     refill_period_sec, psp_category, consumption_rate_per_minute, recovery_eta_seconds, \
     exhaustion_projection_seconds, error_404_rate, response_timestamp, created_at";

const ALERT_COLUMNS: &str = "id, endpoint_id, severity, threshold_percent, available_tokens, \
     capacity, utilization_percent, consumption_rate_per_minute, recovery_eta_seconds, \
     exhaustion_projection_seconds, psp_category, message, resolved, resolved_at, \
     resolution_notes, created_at";

/// SQLite-backed implementation of all three store traits.
///
/// A single connection is shared behind a mutex and driven from
/// `spawn_blocking`, so callers on the async runtime never block on I/O.
/// Timestamps are stored as fixed-width RFC 3339 text (nanosecond precision,
/// `Z` suffix) so that string order equals time order.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Other(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Rate-limit schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
        conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = Self::lock(&conn);
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn get_category(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<PspCategory>> {
    let raw: Option<String> = row.get(idx)?;
    PspCategory::parse_optional(raw.as_deref()).map_err(|e| conversion_err(idx, e))
}

fn category_str(category: Option<PspCategory>) -> Option<&'static str> {
    category.map(|c| c.as_str())
}

fn map_policy(row: &Row<'_>) -> rusqlite::Result<Policy> {
    Ok(Policy {
        endpoint_id: row.get(0)?,
        endpoint_path: row.get(1)?,
        http_method: row.get(2)?,
        capacity: row.get(3)?,
        refill_tokens: row.get(4)?,
        refill_period_sec: row.get(5)?,
        psp_category: get_category(row, 6)?,
        created_at: get_ts(row, 7)?,
        updated_at: get_ts(row, 8)?,
    })
}

fn map_state(row: &Row<'_>) -> rusqlite::Result<PolicyState> {
    Ok(PolicyState {
        id: row.get(0)?,
        endpoint_id: row.get(1)?,
        available_tokens: row.get(2)?,
        capacity: row.get(3)?,
        refill_tokens: row.get(4)?,
        refill_period_sec: row.get(5)?,
        psp_category: get_category(row, 6)?,
        consumption_rate_per_minute: row.get(7)?,
        recovery_eta_seconds: row.get(8)?,
        exhaustion_projection_seconds: row.get(9)?,
        error_404_rate: row.get(10)?,
        response_timestamp: get_ts(row, 11)?,
        created_at: get_ts(row, 12)?,
    })
}

fn map_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let severity: String = row.get(2)?;
    Ok(Alert {
        id: row.get(0)?,
        endpoint_id: row.get(1)?,
        severity: severity
            .parse::<Severity>()
            .map_err(|e| conversion_err(2, e))?,
        threshold_percent: row.get(3)?,
        available_tokens: row.get(4)?,
        capacity: row.get(5)?,
        utilization_percent: row.get(6)?,
        consumption_rate_per_minute: row.get(7)?,
        recovery_eta_seconds: row.get(8)?,
        exhaustion_projection_seconds: row.get(9)?,
        psp_category: get_category(row, 10)?,
        message: row.get(11)?,
        resolved: row.get(12)?,
        resolved_at: get_opt_ts(row, 13)?,
        resolution_notes: row.get(14)?,
        created_at: get_ts(row, 15)?,
    })
}

fn upsert_policy(conn: &Connection, policy: &Policy) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO rate_limit_policies ({POLICY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(endpoint_id) DO UPDATE SET
                endpoint_path = excluded.endpoint_path,
                http_method = excluded.http_method,
                capacity = excluded.capacity,
                refill_tokens = excluded.refill_tokens,
                refill_period_sec = excluded.refill_period_sec,
                psp_category = excluded.psp_category,
                updated_at = excluded.updated_at"
        ),
        params![
            policy.endpoint_id,
            policy.endpoint_path,
            policy.http_method,
            policy.capacity,
            policy.refill_tokens,
            policy.refill_period_sec,
            category_str(policy.psp_category),
            ts(&policy.created_at),
            ts(&policy.updated_at),
        ],
    )
}

fn insert_state(conn: &Connection, state: &PolicyState) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO rate_limit_states ({STATE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            state.id,
            state.endpoint_id,
            state.available_tokens,
            state.capacity,
            state.refill_tokens,
            state.refill_period_sec,
            category_str(state.psp_category),
            state.consumption_rate_per_minute,
            state.recovery_eta_seconds,
            state.exhaustion_projection_seconds,
            state.error_404_rate,
            ts(&state.response_timestamp),
            ts(&state.created_at),
        ],
    )
}

#[async_trait]
impl PolicyStore for SqliteStore {
    async fn list_all(&self) -> Result<Vec<Policy>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POLICY_COLUMNS} FROM rate_limit_policies ORDER BY endpoint_id"
            ))?;
            let rows = stmt.query_map([], map_policy)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_by_id(&self, endpoint_id: &str) -> Result<Policy> {
        let id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            let policy = conn
                .query_row(
                    &format!(
                        "SELECT {POLICY_COLUMNS} FROM rate_limit_policies WHERE endpoint_id = ?1"
                    ),
                    params![id],
                    map_policy,
                )
                .optional()?;
            policy.ok_or(StorageError::NotFound {
                entity: "policy",
                id,
            })
        })
        .await
    }

    async fn get_by_category(&self, category: PspCategory) -> Result<Vec<Policy>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POLICY_COLUMNS} FROM rate_limit_policies
                 WHERE psp_category = ?1 OR psp_category IS NULL
                 ORDER BY endpoint_id"
            ))?;
            let rows = stmt.query_map(params![category.as_str()], map_policy)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn upsert(&self, policy: &Policy) -> Result<()> {
        policy.validate()?;
        let policy = policy.clone();
        self.with_conn(move |conn| {
            upsert_policy(conn, &policy)?;
            Ok(())
        })
        .await
    }

    async fn upsert_batch(&self, policies: &[Policy]) -> Result<()> {
        for policy in policies {
            policy.validate()?;
        }
        let policies = policies.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for policy in &policies {
                upsert_policy(&tx, policy)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn insert(&self, state: &PolicyState) -> Result<()> {
        state.validate()?;
        let state = state.clone();
        self.with_conn(move |conn| {
            insert_state(conn, &state)?;
            Ok(())
        })
        .await
    }

    async fn insert_batch(&self, states: &[PolicyState]) -> Result<()> {
        for state in states {
            state.validate()?;
        }
        let states = states.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for state in &states {
                insert_state(&tx, state)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_metrics_batch(&self, states: &[PolicyState]) -> Result<u64> {
        let states = states.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0u64;
            for state in &states {
                updated += tx.execute(
                    "UPDATE rate_limit_states SET
                        consumption_rate_per_minute = ?2,
                        recovery_eta_seconds = ?3,
                        exhaustion_projection_seconds = ?4,
                        error_404_rate = ?5
                     WHERE id = ?1",
                    params![
                        state.id,
                        state.consumption_rate_per_minute,
                        state.recovery_eta_seconds,
                        state.exhaustion_projection_seconds,
                        state.error_404_rate,
                    ],
                )? as u64;
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn get_latest(&self, endpoint_id: &str) -> Result<Option<PolicyState>> {
        let id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {STATE_COLUMNS} FROM rate_limit_states
                         WHERE endpoint_id = ?1
                         ORDER BY created_at DESC, id DESC LIMIT 1"
                    ),
                    params![id],
                    map_state,
                )
                .optional()?)
        })
        .await
    }

    async fn get_latest_all(&self) -> Result<Vec<PolicyState>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATE_COLUMNS} FROM (
                    SELECT *, ROW_NUMBER() OVER (
                        PARTITION BY endpoint_id ORDER BY created_at DESC, id DESC
                    ) AS rn
                    FROM rate_limit_states
                 )
                 WHERE rn = 1
                 ORDER BY endpoint_id"
            ))?;
            let rows = stmt.query_map([], map_state)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_history(
        &self,
        endpoint_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PolicyState>> {
        let id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATE_COLUMNS} FROM rate_limit_states
                 WHERE endpoint_id = ?1 AND created_at >= ?2 AND created_at <= ?3
                 ORDER BY created_at ASC"
            ))?;
            let rows = stmt.query_map(params![id, ts(&from), ts(&to)], map_state)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_previous_before(
        &self,
        endpoint_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<PolicyState>> {
        let id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {STATE_COLUMNS} FROM rate_limit_states
                         WHERE endpoint_id = ?1 AND created_at < ?2
                         ORDER BY created_at DESC LIMIT 1"
                    ),
                    params![id, ts(&before)],
                    map_state,
                )
                .optional()?)
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM rate_limit_states WHERE created_at < ?1",
                params![ts(&cutoff)],
            )?;
            Ok(deleted as u64)
        })
        .await
    }
}

#[async_trait]
impl AlertStore for SqliteStore {
    async fn insert(&self, alert: &Alert) -> Result<()> {
        alert.validate()?;
        let alert = alert.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO rate_limit_alerts ({ALERT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    alert.id,
                    alert.endpoint_id,
                    alert.severity.as_str(),
                    alert.threshold_percent,
                    alert.available_tokens,
                    alert.capacity,
                    alert.utilization_percent,
                    alert.consumption_rate_per_minute,
                    alert.recovery_eta_seconds,
                    alert.exhaustion_projection_seconds,
                    category_str(alert.psp_category),
                    alert.message,
                    alert.resolved,
                    alert.resolved_at.as_ref().map(ts),
                    alert.resolution_notes,
                    ts(&alert.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_unresolved_all(&self) -> Result<Vec<Alert>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM rate_limit_alerts
                 WHERE resolved = 0 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map([], map_alert)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_unresolved_by_endpoint(&self, endpoint_id: &str) -> Result<Vec<Alert>> {
        let id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM rate_limit_alerts
                 WHERE endpoint_id = ?1 AND resolved = 0 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![id], map_alert)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_unresolved_by_severity(&self, severity: Severity) -> Result<Vec<Alert>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM rate_limit_alerts
                 WHERE severity = ?1 AND resolved = 0 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![severity.as_str()], map_alert)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn resolve(&self, id: &str, notes: &str, at: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        let notes = notes.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM rate_limit_alerts WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StorageError::NotFound { entity: "alert", id });
            }
            tx.execute(
                "UPDATE rate_limit_alerts
                 SET resolved = 1, resolved_at = ?2, resolution_notes = ?3
                 WHERE id = ?1 AND resolved = 0",
                params![id, ts(&at), notes],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn resolve_bulk(&self, ids: &[String], notes: &str, at: DateTime<Utc>) -> Result<u64> {
        let ids = ids.to_vec();
        let notes = notes.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut resolved = 0u64;
            for id in &ids {
                resolved += tx.execute(
                    "UPDATE rate_limit_alerts
                     SET resolved = 1, resolved_at = ?2, resolution_notes = ?3
                     WHERE id = ?1 AND resolved = 0",
                    params![id, ts(&at), notes],
                )? as u64;
            }
            tx.commit()?;
            Ok(resolved)
        })
        .await
    }

    async fn auto_resolve(
        &self,
        endpoint_id: &str,
        severities: &[Severity],
        notes: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        if severities.is_empty() {
            return Ok(Vec::new());
        }
        // Severity names are fixed identifiers, safe to inline.
        let in_list = severities
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let id = endpoint_id.to_string();
        let notes = notes.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "UPDATE rate_limit_alerts
                 SET resolved = 1, resolved_at = ?2, resolution_notes = ?3
                 WHERE endpoint_id = ?1 AND resolved = 0 AND severity IN ({in_list})
                 RETURNING {ALERT_COLUMNS}"
            ))?;
            let rows = stmt.query_map(params![id, ts(&at), notes], map_alert)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_history(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Alert>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM rate_limit_alerts
                 WHERE created_at >= ?1 AND created_at <= ?2
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![ts(&from), ts(&to)], map_alert)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_history_by_endpoint(
        &self,
        endpoint_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let id = endpoint_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM rate_limit_alerts
                 WHERE endpoint_id = ?1 AND created_at >= ?2 AND created_at <= ?3
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map(params![id, ts(&from), ts(&to)], map_alert)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
