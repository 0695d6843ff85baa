//! Database schema migrations for learnpath.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Schema version after all migrations have run.
pub const CURRENT_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: users and quiz attempts.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id                      TEXT PRIMARY KEY,
            level                   TEXT NOT NULL DEFAULT 'beginner',
            total_points            INTEGER NOT NULL DEFAULT 0,
            completed_module_count  INTEGER NOT NULL DEFAULT 0,
            completed_modules       TEXT NOT NULL DEFAULT '[]',
            streak                  INTEGER NOT NULL DEFAULT 0,
            last_activity_date      TEXT,
            weekly_progress         INTEGER NOT NULL DEFAULT 0,
            weekly_goal             INTEGER NOT NULL DEFAULT 0,
            deletion_requested      INTEGER NOT NULL DEFAULT 0,
            deletion_requested_at   TEXT,
            deletion_scheduled_for  TEXT,
            active                  INTEGER NOT NULL DEFAULT 1,
            created_at              TEXT NOT NULL,
            version                 INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS attempts (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            quiz_id         TEXT NOT NULL,
            attempt_number  INTEGER NOT NULL,
            timestamp       TEXT NOT NULL,
            cooldown_until  TEXT,
            active          INTEGER NOT NULL DEFAULT 1,
            expires_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attempts_pair_active ON attempts(user_id, quiz_id, active);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: deletion reason and TTL sweep index.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE users ADD COLUMN deletion_reason TEXT;
         CREATE INDEX IF NOT EXISTS idx_attempts_expires_at ON attempts(expires_at);
         CREATE INDEX IF NOT EXISTS idx_users_deletion ON users(deletion_requested);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), CURRENT_VERSION);

        let has_reason: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('users') WHERE name = 'deletion_reason'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(has_reason, 1);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), CURRENT_VERSION);
    }

    #[test]
    fn migrate_upgrades_v1_database() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 1);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 2);
    }
}
