//! Durable state of the hub: jobs, tasks, flexlets, tags, and the label
//! index, backed by SQLite through sqlx.
//!
//! The store is the single source of truth for every state transition and
//! the only component that touches persistent state. Submodules split the
//! surface by concern:
//!
//! - `jobs`: insert, read, list, label maintenance
//! - `tasks`: take / heartbeat / finish, the scheduling state machine
//! - `flexlets`: fleet upkeep and capacity stats
//! - `tags`: package alias table
//! - `maintain`: staleness sweep executed by the Maintainer
//!
//! Every mutating operation runs inside one transaction. The pool is pinned
//! to a single connection, so transactions are fully serialized: SQLite's
//! serializable isolation plus a single writer subsumes the row locks a
//! multi-writer engine would need for the take-next-pending scan.

mod flexlets;
mod jobs;
mod maintain;
mod states;
mod tags;
mod tasks;

pub use states::{format_flexlet_state, format_job_state, parse_flexlet_state, parse_job_state};

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("no pending task")]
    NoPendingTask,
    #[error("job {0} not found")]
    JobNotFound(i64),
    #[error("tag {0:?} not found")]
    TagNotFound(String),
    #[error("invalid hash {0:?}")]
    InvalidHash(String),
    #[error("unknown job state {0:?}")]
    UnknownJobState(String),
    #[error("unknown flexlet state {0:?}")]
    UnknownFlexletState(String),
    #[error("{op}: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("{op}: decoding stored record: {source}")]
    Decode {
        op: &'static str,
        #[source]
        source: prost::DecodeError,
    },
}

impl MetaStoreError {
    /// True for the error kinds a caller should report as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MetaStoreError::NoPendingTask
                | MetaStoreError::JobNotFound(_)
                | MetaStoreError::TagNotFound(_)
        )
    }
}

/// Annotates a database error with the operation it belongs to, so callers
/// see "taking a pending task: <cause>" instead of a bare driver error.
pub(crate) fn db_err(op: &'static str) -> impl Fn(sqlx::Error) -> MetaStoreError {
    move |source| MetaStoreError::Database { op, source }
}

pub(crate) fn decode_err(op: &'static str) -> impl Fn(prost::DecodeError) -> MetaStoreError {
    move |source| MetaStoreError::Decode { op, source }
}

/// Current wall-clock time as epoch milliseconds; the store's only clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  priority INTEGER NOT NULL DEFAULT 0,
  state TEXT NOT NULL DEFAULT 'PENDING',
  task_uuid TEXT,
  request BLOB NOT NULL,
  created INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS jobs_by_state ON jobs (state, priority DESC, id ASC);
CREATE TABLE IF NOT EXISTS tasks (
  uuid TEXT PRIMARY KEY,
  flexlet TEXT NOT NULL,
  state TEXT NOT NULL DEFAULT 'RUNNING',
  started INTEGER NOT NULL,
  finished INTEGER,
  last_update INTEGER NOT NULL,
  response BLOB
);
CREATE TABLE IF NOT EXISTS flexlets (
  name TEXT PRIMARY KEY,
  state TEXT NOT NULL,
  cores INTEGER NOT NULL DEFAULT 0,
  data BLOB NOT NULL,
  last_update INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS tags (
  tag TEXT PRIMARY KEY,
  hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS labels (
  job_id INTEGER NOT NULL,
  label TEXT NOT NULL,
  UNIQUE (job_id, label)
);
CREATE INDEX IF NOT EXISTS labels_by_label ON labels (label)
"#;

pub struct MetaStore {
    pool: SqlitePool,
}

impl MetaStore {
    /// Opens the store at the given sqlx URL. The pool is limited to one
    /// connection; see the module docs for why.
    pub async fn connect(url: &str) -> Result<Self, MetaStoreError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(db_err("opening the metadata store"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        // One pinned connection: transactions serialize fully, and an
        // in-memory database survives for the store's whole lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(db_err("opening the metadata store"))?;
        Ok(Self { pool })
    }

    /// Direct pool access, used by tests to inspect and doctor rows.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates all tables idempotently inside one transaction. Failures of
    /// individual statements are tolerated and assumed to mean the object
    /// already exists.
    pub async fn init_tables(&self) -> Result<(), MetaStoreError> {
        let op = "initializing tables";
        let mut tx = self.pool.begin().await.map_err(db_err(op))?;
        for stmt in SCHEMA.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            let _ = sqlx::query(stmt).execute(&mut *tx).await;
        }
        tx.commit().await.map_err(db_err(op))
    }
}
