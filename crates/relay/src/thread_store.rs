//! Session thread store - durable session → Discord thread bindings
//!
//! Uses `spawn_blocking` for async-safe SQLite access. Every call opens its own
//! connection and commits before returning; concurrent hook processes share
//! the file through WAL mode and `busy_timeout`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};

use crate::migration_runner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadBinding {
    pub session_id: String,
    pub channel_id: String,
    pub thread_id: String,
    pub created_at: String,
    pub last_used_at: String,
    pub message_count: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another dispatch bound this session first
    #[error("session {session_id} already has a thread in channel {channel_id}")]
    Conflict {
        session_id: String,
        channel_id: String,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct ThreadStore {
    db_path: Arc<PathBuf>,
}

impl ThreadStore {
    /// Open (creating if needed) the store at `db_path` and apply pending migrations.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            db_path: Arc::new(db_path.into()),
        };
        store
            .with_conn(|conn| {
                migration_runner::run_migrations(conn)?;
                Ok(())
            })
            .await?;
        Ok(store)
    }

    pub async fn resolve(
        &self,
        session_id: &str,
        channel_id: &str,
    ) -> Result<Option<ThreadBinding>, StoreError> {
        let session_id = session_id.to_string();
        let channel_id = channel_id.to_string();
        self.with_conn(move |conn| {
            let binding = conn
                .query_row(
                    "SELECT session_id, channel_id, thread_id, created_at, last_used_at, message_count
                     FROM thread_bindings
                     WHERE session_id = ?1 AND channel_id = ?2",
                    params![session_id, channel_id],
                    binding_from_row,
                )
                .optional()?;
            Ok(binding)
        })
        .await
    }

    /// Insert a new binding. Never overwrites: if the pair is already bound the
    /// insert fails with [`StoreError::Conflict`] and the existing row is untouched.
    pub async fn bind(
        &self,
        session_id: &str,
        channel_id: &str,
        thread_id: &str,
    ) -> Result<ThreadBinding, StoreError> {
        let now = now_rfc3339();
        let binding = ThreadBinding {
            session_id: session_id.to_string(),
            channel_id: channel_id.to_string(),
            thread_id: thread_id.to_string(),
            created_at: now.clone(),
            last_used_at: now,
            message_count: 0,
        };

        let row = binding.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO thread_bindings
                   (session_id, channel_id, thread_id, created_at, last_used_at, message_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                params![
                    row.session_id,
                    row.channel_id,
                    row.thread_id,
                    row.created_at,
                    row.last_used_at
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict {
                        session_id: row.session_id,
                        channel_id: row.channel_id,
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        debug!(
            component = "thread_store",
            event = "thread_store.bound",
            session_id = %binding.session_id,
            channel_id = %binding.channel_id,
            thread_id = %binding.thread_id,
        );
        Ok(binding)
    }

    /// Record one more delivered message. A binding that disappeared underneath
    /// us is logged and otherwise ignored.
    pub async fn touch(&self, session_id: &str, channel_id: &str) -> Result<(), StoreError> {
        let session = session_id.to_string();
        let channel = channel_id.to_string();
        let now = now_rfc3339();
        let updated = self
            .with_conn(move |conn| {
                let n = conn.execute(
                    "UPDATE thread_bindings
                     SET message_count = message_count + 1, last_used_at = ?3
                     WHERE session_id = ?1 AND channel_id = ?2",
                    params![session, channel, now],
                )?;
                Ok(n)
            })
            .await?;

        if updated == 0 {
            warn!(
                component = "thread_store",
                event = "thread_store.touch_missing",
                session_id = %session_id,
                channel_id = %channel_id,
                "Binding vanished before touch"
            );
        }
        Ok(())
    }

    /// Most recently used bindings first
    pub async fn list(&self, limit: usize) -> Result<Vec<ThreadBinding>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, channel_id, thread_id, created_at, last_used_at, message_count
                 FROM thread_bindings
                 ORDER BY last_used_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], binding_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = Arc::clone(&self.db_path);
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&db_path)?;
            f(&mut conn)
        })
        .await?
    }
}

fn connect(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    // busy_timeout first so the WAL switch itself waits out a concurrent writer
    conn.execute_batch(
        "PRAGMA busy_timeout = 5000;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;",
    )?;
    Ok(conn)
}

fn binding_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadBinding> {
    let message_count: i64 = row.get(5)?;
    Ok(ThreadBinding {
        session_id: row.get(0)?,
        channel_id: row.get(1)?,
        thread_id: row.get(2)?,
        created_at: row.get(3)?,
        last_used_at: row.get(4)?,
        message_count: u64::try_from(message_count).unwrap_or(0),
    })
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
