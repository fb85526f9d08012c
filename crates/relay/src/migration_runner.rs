//! Lightweight migration runner for rusqlite.
//!
//! Migrations are numbered SQL files under `migrations/`, compiled into the
//! binary so the hook works from any install location. Applied versions are
//! tracked in `schema_versions`; pending ones run in order on open.

use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{debug, info};

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_thread_bindings",
    include_str!("../../../migrations/001_thread_bindings.sql"),
)];

/// Run all pending migrations against the given connection.
///
/// Several hook processes may open the database at once, so the whole check
/// runs inside an immediate transaction: the first writer applies, the rest
/// wait on `busy_timeout` and then find nothing pending.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<usize> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )?;

    let mut applied = 0;
    for (name, sql) in MIGRATIONS {
        let Some(version) = parse_version(name) else {
            continue;
        };

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_versions WHERE version = ?1)",
            params![version],
            |row| row.get(0),
        )?;
        if exists {
            continue;
        }

        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_versions (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;

        info!(
            component = "migrations",
            event = "migration.applied",
            version = version,
            name = %name,
            "Applied migration"
        );
        applied += 1;
    }

    tx.commit()?;

    debug!(
        component = "migrations",
        event = "migrations.complete",
        total = MIGRATIONS.len(),
        applied = applied,
        "Migration check complete"
    );

    Ok(applied)
}

/// Extract numeric version prefix from a migration name like "001_initial".
fn parse_version(name: &str) -> Option<i64> {
    name.split('_').next()?.parse().ok()
}
