//! # Storage Module
//!
//! Relational store backing every Storyflow entity.
//!
//! A [`Store`] owns one SQLite connection. Reads go straight to the
//! connection; every write runs inside a `BEGIN IMMEDIATE` transaction so
//! that separate processes sharing one database file serialize their writes
//! (the busy timeout makes the second writer wait instead of failing).
//!
//! SQL lives in per-table data-access objects (`ProjectDao`, `StageDao`,
//! `VersionDao`, `SettingsDao`, `PromptDao`) that take a plain
//! `&Connection`, so they compose inside one transaction.

mod projects;
mod prompts;
mod settings;
mod stages;

pub(crate) use projects::ProjectDao;
pub(crate) use stages::{StageDao, VersionDao, VersionDraft};

use crate::StoryflowError;
use crate::primitives::{BUSY_TIMEOUT_MS, SCHEMA_VERSION};
use crate::prompt::default_template;
use crate::registry::STAGE_ORDER;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT    NOT NULL,
    description TEXT    NOT NULL DEFAULT '',
    category    TEXT    NOT NULL DEFAULT '',
    tags        TEXT    NOT NULL DEFAULT '[]',
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    deleted_at  INTEGER,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_updated ON projects(is_deleted, updated_at);

CREATE TABLE IF NOT EXISTS stages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id      INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    stage_type      TEXT    NOT NULL,
    position        INTEGER NOT NULL,
    status          TEXT    NOT NULL,
    content         TEXT    NOT NULL DEFAULT '',
    last_ai_model   TEXT,
    last_ai_params  TEXT,
    version_counter INTEGER NOT NULL DEFAULT 0,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL,
    UNIQUE (project_id, stage_type)
);

CREATE TABLE IF NOT EXISTS stage_versions (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    stage_id       INTEGER NOT NULL REFERENCES stages(id) ON DELETE CASCADE,
    version_number INTEGER NOT NULL,
    content        TEXT    NOT NULL,
    source         TEXT    NOT NULL,
    ai_model       TEXT,
    ai_params      TEXT,
    label          TEXT,
    created_at     INTEGER NOT NULL,
    UNIQUE (stage_id, version_number)
);

CREATE TABLE IF NOT EXISTS ai_settings (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT    NOT NULL,
    provider          TEXT    NOT NULL,
    api_key_encrypted TEXT    NOT NULL DEFAULT '',
    base_url          TEXT    NOT NULL,
    model             TEXT    NOT NULL,
    temperature       REAL    NOT NULL,
    top_p             REAL    NOT NULL,
    max_tokens        INTEGER NOT NULL,
    is_default        INTEGER NOT NULL DEFAULT 0,
    is_active         INTEGER NOT NULL DEFAULT 1,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS system_prompts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    stage_type TEXT    NOT NULL UNIQUE,
    content    TEXT    NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// The Storyflow relational store.
///
/// Not `Clone`: the connection is a unique handle. Share it behind a mutex.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoryflowError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::configure(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoryflowError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, StoryflowError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&mut self) -> Result<(), StoryflowError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoryflowError::ConfigurationError(format!(
                "database schema version {} is newer than supported version {}",
                current, SCHEMA_VERSION
            )));
        }
        if current == SCHEMA_VERSION {
            return Ok(());
        }

        self.write(|tx| {
            tx.execute_batch(SCHEMA)?;
            let now = now_millis();
            for stage in STAGE_ORDER {
                tx.execute(
                    "INSERT OR IGNORE INTO system_prompts (stage_type, content, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![stage.as_str(), default_template(stage), now],
                )?;
            }
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            Ok(())
        })
    }

    /// Schema version recorded in the database file.
    pub fn schema_version(&self) -> Result<i64, StoryflowError> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back (on drop) otherwise.
    pub(crate) fn write<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoryflowError>,
    ) -> Result<T, StoryflowError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

// =============================================================================
// ROW HELPERS
// =============================================================================

/// Current time as epoch milliseconds (storage representation).
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored epoch milliseconds to a timestamp.
pub(crate) fn to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Read a text column and parse it with `FromStr`.
pub(crate) fn parsed_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a nullable JSON text column.
pub(crate) fn json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
