//! SQLite-backed user and attempt storage.
//!
//! Implements every persistence collaborator the engine needs:
//! - [`UserStore`] with a version check on save
//! - [`AttemptStore`] with an atomic supersede of the active attempt
//! - [`SubmissionStore`] writing a user and an attempt in one transaction
//! - [`PurgeExecutor`] removing a user together with its attempts, only while
//!   the user is still due

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

use super::{data_dir, migrations};
use crate::error::{CoreError, DatabaseError, Result};
use crate::model::{AttemptNumber, AttemptRecord, Level, UserId, UserRecord};
use crate::store::{AttemptStore, PurgeExecutor, SubmissionStore, UserStore};

const USER_COLUMNS: &str = "id, level, total_points, completed_module_count, completed_modules,
    streak, last_activity_date, weekly_progress, weekly_goal, deletion_requested,
    deletion_requested_at, deletion_scheduled_for, deletion_reason, active, created_at, version";

const ATTEMPT_COLUMNS: &str =
    "id, user_id, quiz_id, attempt_number, timestamp, cooldown_until, active, expires_at";

// === Helper Functions ===

/// Fixed-width UTC timestamps so text comparison matches time order.
/// Nanosecond precision keeps a stored instant equal to the one written.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Undecodable rows become `CorruptRow`; anything else stays a query error.
fn decode_error(table: &'static str) -> impl Fn(rusqlite::Error) -> CoreError {
    move |err: rusqlite::Error| -> CoreError {
        let message = match &err {
            rusqlite::Error::FromSqlConversionFailure(idx, _, source) => {
                format!("column {idx}: {source}")
            }
            rusqlite::Error::InvalidColumnType(idx, name, ty) => {
                format!("column {idx} ({name}) has type {ty}")
            }
            _ => return err.into(),
        };
        DatabaseError::CorruptRow { table, message }.into()
    }
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    let level: String = row.get(1)?;
    let modules: String = row.get(4)?;
    let last_activity: Option<String> = row.get(6)?;

    Ok(UserRecord {
        id: UserId(parse_uuid(row, 0)?),
        level: level.parse::<Level>().map_err(|e| conversion_error(1, e))?,
        total_points: row.get::<_, i64>(2)?.max(0) as u64,
        completed_module_count: row.get(3)?,
        completed_modules: serde_json::from_str::<BTreeSet<String>>(&modules)
            .map_err(|e| conversion_error(4, e))?,
        streak: row.get(5)?,
        last_activity_date: last_activity
            .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
            .transpose()
            .map_err(|e| conversion_error(6, e))?,
        weekly_progress: row.get(7)?,
        weekly_goal: row.get(8)?,
        deletion_requested: row.get(9)?,
        deletion_requested_at: parse_opt_ts(row, 10)?,
        deletion_scheduled_for: parse_opt_ts(row, 11)?,
        deletion_reason: row.get(12)?,
        active: row.get(13)?,
        created_at: parse_ts(row, 14)?,
        version: row.get::<_, i64>(15)?.max(0) as u64,
    })
}

fn row_to_attempt(row: &Row<'_>) -> rusqlite::Result<AttemptRecord> {
    let number: u8 = row.get(3)?;
    Ok(AttemptRecord {
        id: parse_uuid(row, 0)?,
        user_id: UserId(parse_uuid(row, 1)?),
        quiz_id: row.get(2)?,
        attempt_number: AttemptNumber::try_from(number).map_err(|e| conversion_error(3, e))?,
        timestamp: parse_ts(row, 4)?,
        cooldown_until: parse_opt_ts(row, 5)?,
        active: row.get(6)?,
        expires_at: parse_ts(row, 7)?,
    })
}

fn active_attempt(conn: &Connection, user_id: UserId, quiz_id: &str) -> Result<Option<AttemptRecord>> {
    conn.query_row(
        &format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts
             WHERE user_id = ?1 AND quiz_id = ?2 AND active = 1
             ORDER BY timestamp DESC LIMIT 1"
        ),
        params![user_id.to_string(), quiz_id],
        row_to_attempt,
    )
    .optional()
    .map_err(decode_error("attempts"))
}

/// Fail with `StaleRecord` unless the pair's active attempt is `expected`.
fn check_active(conn: &Connection, expected: Option<&AttemptRecord>, record: &AttemptRecord) -> Result<()> {
    let current = active_attempt(conn, record.user_id, &record.quiz_id)?.map(|a| a.id);
    if current != expected.map(|a| a.id) {
        return Err(CoreError::StaleRecord {
            entity: "attempt",
            id: format!("{}/{}", record.user_id, record.quiz_id),
        });
    }
    Ok(())
}

fn user_exists(conn: &Connection, id: UserId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Versioned UPDATE of every mutable column. Does not bump `user.version`.
fn update_user(conn: &Connection, user: &UserRecord) -> Result<()> {
    let modules = serde_json::to_string(&user.completed_modules)?;
    let updated = conn.execute(
        "UPDATE users SET
            level = ?3, total_points = ?4, completed_module_count = ?5,
            completed_modules = ?6, streak = ?7, last_activity_date = ?8,
            weekly_progress = ?9, weekly_goal = ?10, deletion_requested = ?11,
            deletion_requested_at = ?12, deletion_scheduled_for = ?13,
            deletion_reason = ?14, active = ?15, version = version + 1
         WHERE id = ?1 AND version = ?2",
        params![
            user.id.to_string(),
            user.version as i64,
            user.level.as_str(),
            user.total_points as i64,
            user.completed_module_count,
            modules,
            user.streak,
            user.last_activity_date.map(|d| d.format("%Y-%m-%d").to_string()),
            user.weekly_progress,
            user.weekly_goal,
            user.deletion_requested,
            user.deletion_requested_at.map(format_ts),
            user.deletion_scheduled_for.map(format_ts),
            user.deletion_reason,
            user.active,
        ],
    )?;

    if updated == 0 {
        return Err(if user_exists(conn, user.id)? {
            CoreError::StaleRecord {
                entity: "user",
                id: user.id.to_string(),
            }
        } else {
            CoreError::NotFound {
                entity: "user",
                id: user.id.to_string(),
            }
        });
    }
    Ok(())
}

fn deactivate(conn: &Connection, user_id: UserId, quiz_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE attempts SET active = 0 WHERE user_id = ?1 AND quiz_id = ?2 AND active = 1",
        params![user_id.to_string(), quiz_id],
    )
}

fn insert_attempt(conn: &Connection, record: &AttemptRecord) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT INTO attempts ({ATTEMPT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            record.id.to_string(),
            record.user_id.to_string(),
            record.quiz_id,
            record.attempt_number.as_u8(),
            format_ts(record.timestamp),
            record.cooldown_until.map(format_ts),
            record.active,
            format_ts(record.expires_at),
        ],
    )?;
    Ok(())
}

/// SQLite database for progress storage.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `<data dir>/learnpath.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("learnpath.db");
        Self::open_at(&path)
    }

    /// Open (or create) a database file at `path`.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        // Concurrent CLI invocations wait for the writer instead of failing.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    /// All users, oldest first.
    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at"))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(decode_error("users"))?;
        Ok(users)
    }

    /// Every attempt recorded for a user, newest first.
    pub fn list_attempts(&self, user_id: UserId) -> Result<Vec<AttemptRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE user_id = ?1 ORDER BY timestamp DESC"
        ))?;
        let attempts = stmt
            .query_map(params![user_id.to_string()], row_to_attempt)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(decode_error("attempts"))?;
        Ok(attempts)
    }

    fn write_tx(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl UserStore for Database {
    fn insert(&self, user: &UserRecord) -> Result<()> {
        let modules = serde_json::to_string(&user.completed_modules)?;
        let inserted = self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO users ({USER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                user.id.to_string(),
                user.level.as_str(),
                user.total_points as i64,
                user.completed_module_count,
                modules,
                user.streak,
                user.last_activity_date.map(|d| d.format("%Y-%m-%d").to_string()),
                user.weekly_progress,
                user.weekly_goal,
                user.deletion_requested,
                user.deletion_requested_at.map(format_ts),
                user.deletion_scheduled_for.map(format_ts),
                user.deletion_reason,
                user.active,
                format_ts(user.created_at),
                user.version as i64,
            ],
        )?;
        if inserted == 0 {
            return Err(CoreError::StaleRecord {
                entity: "user",
                id: user.id.to_string(),
            });
        }
        Ok(())
    }

    fn load(&self, id: UserId) -> Result<Option<UserRecord>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .optional()
            .map_err(decode_error("users"))?;
        Ok(user)
    }

    fn save(&self, user: &mut UserRecord) -> Result<()> {
        update_user(&self.conn, user)?;
        user.version += 1;
        Ok(())
    }

    fn list_pending_deletions(&self) -> Result<Vec<UserRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deletion_requested = 1
             ORDER BY deletion_scheduled_for"
        ))?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(decode_error("users"))?;
        Ok(users)
    }
}

impl AttemptStore for Database {
    fn load_active(&self, user_id: UserId, quiz_id: &str) -> Result<Option<AttemptRecord>> {
        active_attempt(&self.conn, user_id, quiz_id)
    }

    fn deactivate_all(&self, user_id: UserId, quiz_id: &str) -> Result<usize> {
        Ok(deactivate(&self.conn, user_id, quiz_id)?)
    }

    fn create(&self, record: &AttemptRecord) -> Result<()> {
        Ok(insert_attempt(&self.conn, record)?)
    }

    fn supersede(&self, expected: Option<&AttemptRecord>, record: &AttemptRecord) -> Result<()> {
        let tx = self.write_tx()?;
        // Dropping the transaction on error rolls it back.
        check_active(&tx, expected, record)?;
        let replaced = deactivate(&tx, record.user_id, &record.quiz_id)?;
        insert_attempt(&tx, record)?;
        tx.commit()?;

        tracing::debug!(
            user_id = %record.user_id,
            quiz_id = %record.quiz_id,
            replaced,
            "active attempt superseded"
        );
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM attempts WHERE expires_at <= ?1",
            params![format_ts(now)],
        )?;
        Ok(removed)
    }
}

impl SubmissionStore for Database {
    fn save_with_attempt(
        &self,
        user: &mut UserRecord,
        expected: Option<&AttemptRecord>,
        record: &AttemptRecord,
    ) -> Result<()> {
        let tx = self.write_tx()?;
        check_active(&tx, expected, record)?;
        update_user(&tx, user)?;
        deactivate(&tx, record.user_id, &record.quiz_id)?;
        insert_attempt(&tx, record)?;
        tx.commit()?;

        user.version += 1;
        Ok(())
    }
}

impl PurgeExecutor for Database {
    fn purge(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()> {
        let tx = self.write_tx()?;
        let users = tx.execute(
            "DELETE FROM users
             WHERE id = ?1 AND deletion_requested = 1 AND deletion_scheduled_for <= ?2",
            params![user_id.to_string(), format_ts(now)],
        )?;
        if users == 0 {
            return Err(if user_exists(&tx, user_id)? {
                CoreError::StaleRecord {
                    entity: "user",
                    id: user_id.to_string(),
                }
            } else {
                CoreError::NotFound {
                    entity: "user",
                    id: user_id.to_string(),
                }
            });
        }
        let attempts = tx.execute(
            "DELETE FROM attempts WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        tx.commit()?;

        tracing::info!(%user_id, attempts, "user purged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 30, 0).unwrap()
    }

    fn attempt(user: UserId, n: AttemptNumber, at: DateTime<Utc>) -> AttemptRecord {
        AttemptRecord::new(user, "quiz-1", n, at, Duration::minutes(30), Duration::hours(24))
    }

    #[test]
    fn user_roundtrip_preserves_fields() {
        let db = Database::open_memory().unwrap();
        let mut user = UserRecord::new(4, now());
        user.completed_modules.insert("intro".into());
        user.completed_module_count = 1;
        user.last_activity_date = NaiveDate::from_ymd_opt(2024, 6, 30);
        user.deletion_reason = Some("test".into());
        db.insert(&user).unwrap();

        let loaded = db.load(user.id).unwrap().unwrap();
        assert_eq!(loaded, user);
    }

    #[test]
    fn save_checks_version() {
        let db = Database::open_memory().unwrap();
        let user = UserRecord::new(4, now());
        db.insert(&user).unwrap();

        let mut a = db.load(user.id).unwrap().unwrap();
        let mut b = a.clone();
        a.streak = 3;
        db.save(&mut a).unwrap();
        assert_eq!(a.version, 1);

        b.streak = 9;
        assert!(db.save(&mut b).unwrap_err().is_conflict());
        assert_eq!(db.load(user.id).unwrap().unwrap().streak, 3);

        let mut ghost = UserRecord::new(4, now());
        assert!(matches!(
            db.save(&mut ghost),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let db = Database::open_memory().unwrap();
        let user = UserRecord::new(4, now());
        db.insert(&user).unwrap();
        assert!(db.insert(&user).is_err());
    }

    #[test]
    fn supersede_leaves_one_active_attempt() {
        let db = Database::open_memory().unwrap();
        let user = UserId::new();
        let first = attempt(user, AttemptNumber::First, now());
        db.supersede(None, &first).unwrap();
        let second = attempt(user, AttemptNumber::Second, now() + Duration::minutes(2));
        db.supersede(Some(&first), &second).unwrap();

        let all = db.list_attempts(user).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|a| a.active).count(), 1);
        assert_eq!(db.load_active(user, "quiz-1").unwrap().unwrap(), second);
    }

    #[test]
    fn supersede_with_outdated_expectation_rolls_back() {
        let db = Database::open_memory().unwrap();
        let user = UserId::new();
        let first = attempt(user, AttemptNumber::First, now());
        db.supersede(None, &first).unwrap();

        let racing = attempt(user, AttemptNumber::First, now());
        assert!(db.supersede(None, &racing).unwrap_err().is_conflict());
        assert_eq!(db.list_attempts(user).unwrap().len(), 1);
        assert_eq!(db.load_active(user, "quiz-1").unwrap().unwrap().id, first.id);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let db = Database::open_memory().unwrap();
        let user = UserId::new();
        db.create(&attempt(user, AttemptNumber::First, now())).unwrap();
        db.create(&attempt(user, AttemptNumber::First, now() + Duration::hours(10)))
            .unwrap();

        let removed = db.sweep_expired(now() + Duration::hours(24)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.list_attempts(user).unwrap().len(), 1);
    }

    fn pending_user() -> UserRecord {
        let mut pending = UserRecord::new(4, now());
        pending.deletion_requested = true;
        pending.deletion_requested_at = Some(now());
        pending.deletion_scheduled_for = Some(now() + Duration::days(7));
        pending.active = false;
        pending
    }

    #[test]
    fn purge_removes_user_and_attempts() {
        let db = Database::open_memory().unwrap();
        let user = pending_user();
        db.insert(&user).unwrap();
        db.create(&attempt(user.id, AttemptNumber::First, now())).unwrap();

        let later = now() + Duration::days(7);
        db.purge(user.id, later).unwrap();
        assert!(db.load(user.id).unwrap().is_none());
        assert!(db.list_attempts(user.id).unwrap().is_empty());
        assert!(matches!(db.purge(user.id, later), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn purge_keeps_user_that_is_not_due() {
        let db = Database::open_memory().unwrap();
        let pending = pending_user();
        let active = UserRecord::new(4, now());
        db.insert(&pending).unwrap();
        db.insert(&active).unwrap();
        db.create(&attempt(pending.id, AttemptNumber::First, now())).unwrap();

        let early = now() + Duration::days(6);
        assert!(db.purge(pending.id, early).unwrap_err().is_conflict());
        assert!(db.purge(active.id, now() + Duration::days(30)).unwrap_err().is_conflict());
        assert!(db.load(pending.id).unwrap().is_some());
        assert_eq!(db.list_attempts(pending.id).unwrap().len(), 1);
    }

    #[test]
    fn pending_deletions_are_listed() {
        let db = Database::open_memory().unwrap();
        let pending = pending_user();
        db.insert(&pending).unwrap();
        db.insert(&UserRecord::new(4, now())).unwrap();

        let listed = db.list_pending_deletions().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, pending.id);
    }

    #[test]
    fn save_with_attempt_rolls_back_on_stale_user() {
        let db = Database::open_memory().unwrap();
        let user = UserRecord::new(4, now());
        db.insert(&user).unwrap();

        let mut stale = db.load(user.id).unwrap().unwrap();
        let mut other = stale.clone();
        db.save(&mut other).unwrap();

        stale.total_points = 7;
        let record = attempt(user.id, AttemptNumber::First, now());
        assert!(db.save_with_attempt(&mut stale, None, &record).unwrap_err().is_conflict());
        assert!(db.list_attempts(user.id).unwrap().is_empty());
        assert_eq!(db.load(user.id).unwrap().unwrap().total_points, 0);

        let mut current = db.load(user.id).unwrap().unwrap();
        current.total_points = 7;
        db.save_with_attempt(&mut current, None, &record).unwrap();
        assert_eq!(db.load(user.id).unwrap().unwrap(), current);
        assert_eq!(db.load_active(user.id, "quiz-1").unwrap().unwrap(), record);
    }

    #[test]
    fn save_with_attempt_rolls_back_on_changed_attempt() {
        let db = Database::open_memory().unwrap();
        let user = UserRecord::new(4, now());
        db.insert(&user).unwrap();
        let first = attempt(user.id, AttemptNumber::First, now());
        db.supersede(None, &first).unwrap();

        let mut copy = db.load(user.id).unwrap().unwrap();
        copy.total_points = 3;
        let racing = attempt(user.id, AttemptNumber::First, now());
        assert!(db.save_with_attempt(&mut copy, None, &racing).unwrap_err().is_conflict());
        assert_eq!(copy.version, 0);
        assert_eq!(db.load(user.id).unwrap().unwrap().total_points, 0);
    }

    #[test]
    fn sub_microsecond_timestamps_survive_storage() {
        let db = Database::open_memory().unwrap();
        let at = now() + Duration::nanoseconds(123_456_789);
        let record = attempt(UserId::new(), AttemptNumber::Second, at);
        db.create(&record).unwrap();
        assert_eq!(db.load_active(record.user_id, "quiz-1").unwrap().unwrap(), record);
    }

    #[test]
    fn undecodable_row_is_reported_as_corrupt() {
        let db = Database::open_memory().unwrap();
        let user = UserRecord::new(4, now());
        db.insert(&user).unwrap();
        db.conn()
            .execute(
                "UPDATE users SET level = 'expert' WHERE id = ?1",
                params![user.id.to_string()],
            )
            .unwrap();

        let err = db.load(user.id).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Database(DatabaseError::CorruptRow { table: "users", .. })
        ));
    }
}
