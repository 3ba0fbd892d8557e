//! Process-wide record of issues that are in flight or done.
//!
//! The [`IdempotencyTracker`] guarantees at most one pipeline run per
//! [`IssueRef`]. Storage is injected through [`IdempotencyStore`]: the
//! in-memory store is the default, the SQLite store survives restarts.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::models::IssueRef;

// ── Records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    InFlight,
    Succeeded,
    Failed,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InFlight)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_flight" => Ok(Self::InFlight),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown record state '{}'", other)),
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl From<Outcome> for RecordState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Succeeded => RecordState::Succeeded,
            Outcome::Failed => RecordState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub issue: IssueRef,
    pub state: RecordState,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn in_flight(issue: IssueRef) -> Self {
        Self {
            issue,
            state: RecordState::InFlight,
            updated_at: Utc::now(),
        }
    }
}

// ── Store trait ───────────────────────────────────────────────────────

/// Backing storage for processing records.
///
/// `insert_if_absent` must be atomic: of any number of concurrent calls for
/// the same issue, exactly one returns `true`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, issue: &IssueRef) -> Result<Option<ProcessingRecord>, StoreError>;

    async fn put(&self, record: ProcessingRecord) -> Result<(), StoreError>;

    async fn insert_if_absent(&self, record: ProcessingRecord) -> Result<bool, StoreError>;
}

/// In-process store behind a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<IssueRef, ProcessingRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<IssueRef, ProcessingRecord>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn get(&self, issue: &IssueRef) -> Result<Option<ProcessingRecord>, StoreError> {
        Ok(self.lock()?.get(issue).cloned())
    }

    async fn put(&self, record: ProcessingRecord) -> Result<(), StoreError> {
        self.lock()?.insert(record.issue.clone(), record);
        Ok(())
    }

    async fn insert_if_absent(&self, record: ProcessingRecord) -> Result<bool, StoreError> {
        let mut records = self.lock()?;
        if records.contains_key(&record.issue) {
            return Ok(false);
        }
        records.insert(record.issue.clone(), record);
        Ok(true)
    }
}

/// SQLite-backed store. All access runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and create the table.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open idempotency database at {}", path.display()))?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory idempotency database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS processing_records (
                repository TEXT NOT NULL,
                number INTEGER NOT NULL,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (repository, number)
            );
            ",
        )
        .context("Failed to create processing_records table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard).map_err(|e| StoreError::Backend(e.into()))
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::Error::new(e).context("store task panicked")))?
    }
}

fn row_to_record(
    repository: String,
    number: i64,
    state: String,
    updated_at: String,
) -> Result<ProcessingRecord, StoreError> {
    let state = state
        .parse::<RecordState>()
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("Invalid updated_at: {}", e)))?
        .with_timezone(&Utc);
    Ok(ProcessingRecord {
        issue: IssueRef::new(repository, number as u64),
        state,
        updated_at,
    })
}

#[async_trait]
impl IdempotencyStore for SqliteStore {
    async fn get(&self, issue: &IssueRef) -> Result<Option<ProcessingRecord>, StoreError> {
        let repository = issue.repository.clone();
        let number = issue.number as i64;
        let row = self
            .call(move |conn| {
                conn.query_row(
                    "SELECT repository, number, state, updated_at FROM processing_records
                     WHERE repository = ?1 AND number = ?2",
                    params![repository, number],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;
        row.map(|(repository, number, state, updated_at)| {
            row_to_record(repository, number, state, updated_at)
        })
        .transpose()
    }

    async fn put(&self, record: ProcessingRecord) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO processing_records (repository, number, state, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.issue.repository,
                    record.issue.number as i64,
                    record.state.as_str(),
                    record.updated_at.to_rfc3339()
                ],
            )
        })
        .await?;
        Ok(())
    }

    async fn insert_if_absent(&self, record: ProcessingRecord) -> Result<bool, StoreError> {
        let inserted = self
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO processing_records (repository, number, state, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        record.issue.repository,
                        record.issue.number as i64,
                        record.state.as_str(),
                        record.updated_at.to_rfc3339()
                    ],
                )
            })
            .await?;
        Ok(inserted == 1)
    }
}

// ── Tracker ───────────────────────────────────────────────────────────

/// At-most-once gate in front of the pipeline.
#[derive(Clone)]
pub struct IdempotencyTracker {
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyTracker {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Claim `issue`. Returns `true` exactly once per issue; every later call
    /// (whatever the recorded state) returns `false`.
    pub async fn try_begin(&self, issue: &IssueRef) -> Result<bool, StoreError> {
        let claimed = self
            .store
            .insert_if_absent(ProcessingRecord::in_flight(issue.clone()))
            .await?;
        if claimed {
            tracing::debug!(issue = %issue, "claimed issue for processing");
        } else {
            tracing::info!(issue = %issue, "issue already seen, skipping");
        }
        Ok(claimed)
    }

    /// Finalize an in-flight record. Returns `false` (and changes nothing)
    /// when the record is missing or already terminal.
    pub async fn complete(&self, issue: &IssueRef, outcome: Outcome) -> Result<bool, StoreError> {
        let state = RecordState::from(outcome);
        match self.store.get(issue).await? {
            Some(record) if record.state == RecordState::InFlight => {
                self.store
                    .put(ProcessingRecord {
                        issue: issue.clone(),
                        state,
                        updated_at: Utc::now(),
                    })
                    .await?;
                tracing::debug!(issue = %issue, state = %state, "processing record finalized");
                Ok(true)
            }
            Some(record) => {
                tracing::warn!(
                    issue = %issue,
                    current = %record.state,
                    requested = %state,
                    "refusing to change a finalized processing record"
                );
                Ok(false)
            }
            None => {
                tracing::warn!(issue = %issue, "complete() called for an issue that was never claimed");
                Ok(false)
            }
        }
    }

    pub async fn record(&self, issue: &IssueRef) -> Result<Option<ProcessingRecord>, StoreError> {
        self.store.get(issue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(n: u64) -> IssueRef {
        IssueRef::new("owner/repo", n)
    }

    async fn exercise_lifecycle(tracker: IdempotencyTracker) {
        let i = issue(1);
        assert!(tracker.record(&i).await.unwrap().is_none());

        assert!(tracker.try_begin(&i).await.unwrap());
        assert_eq!(
            tracker.record(&i).await.unwrap().unwrap().state,
            RecordState::InFlight
        );
        assert!(!tracker.try_begin(&i).await.unwrap());

        assert!(tracker.complete(&i, Outcome::Succeeded).await.unwrap());
        assert_eq!(
            tracker.record(&i).await.unwrap().unwrap().state,
            RecordState::Succeeded
        );

        // Terminal states never change and never reopen the issue.
        assert!(!tracker.complete(&i, Outcome::Failed).await.unwrap());
        assert_eq!(
            tracker.record(&i).await.unwrap().unwrap().state,
            RecordState::Succeeded
        );
        assert!(!tracker.try_begin(&i).await.unwrap());

        // Other issues are independent.
        assert!(tracker.try_begin(&issue(2)).await.unwrap());
        assert!(tracker.try_begin(&IssueRef::new("owner/other", 1)).await.unwrap());
    }

    async fn exercise_concurrency(tracker: IdempotencyTracker) {
        let i = issue(42);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = tracker.clone();
            let i = i.clone();
            handles.push(tokio::spawn(async move { tracker.try_begin(&i).await.unwrap() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_memory_tracker_lifecycle() {
        exercise_lifecycle(IdempotencyTracker::in_memory()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_try_begin_true_exactly_once() {
        exercise_concurrency(IdempotencyTracker::in_memory()).await;
    }

    #[tokio::test]
    async fn test_sqlite_tracker_lifecycle() {
        let store = SqliteStore::open_in_memory().unwrap();
        exercise_lifecycle(IdempotencyTracker::new(Arc::new(store))).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sqlite_try_begin_true_exactly_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        exercise_concurrency(IdempotencyTracker::new(Arc::new(store))).await;
    }

    #[tokio::test]
    async fn test_failed_record_blocks_reprocessing() {
        let tracker = IdempotencyTracker::in_memory();
        let i = issue(3);
        assert!(tracker.try_begin(&i).await.unwrap());
        assert!(tracker.complete(&i, Outcome::Failed).await.unwrap());
        assert!(!tracker.try_begin(&i).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_without_claim_is_refused() {
        let tracker = IdempotencyTracker::in_memory();
        assert!(!tracker.complete(&issue(9), Outcome::Succeeded).await.unwrap());
        assert!(tracker.record(&issue(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idempotency.db");

        {
            let tracker = IdempotencyTracker::new(Arc::new(SqliteStore::open(&path).unwrap()));
            assert!(tracker.try_begin(&issue(5)).await.unwrap());
            assert!(tracker.complete(&issue(5), Outcome::Succeeded).await.unwrap());
        }

        let tracker = IdempotencyTracker::new(Arc::new(SqliteStore::open(&path).unwrap()));
        assert!(!tracker.try_begin(&issue(5)).await.unwrap());
        let record = tracker.record(&issue(5)).await.unwrap().unwrap();
        assert_eq!(record.state, RecordState::Succeeded);
        assert_eq!(record.issue, issue(5));
    }

    #[test]
    fn test_record_state_round_trip_strings() {
        for state in [RecordState::InFlight, RecordState::Succeeded, RecordState::Failed] {
            assert_eq!(state.as_str().parse::<RecordState>().unwrap(), state);
        }
        assert!("done".parse::<RecordState>().is_err());
        assert!(!RecordState::InFlight.is_terminal());
        assert!(RecordState::Failed.is_terminal());
    }
}
