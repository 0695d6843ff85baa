//! Persistence collaborators consumed by the engine.
//!
//! The engine itself holds no locks. Implementations must serialize writes
//! per key: `UserStore::save` checks the record's `version`, and
//! `AttemptStore::supersede` swaps the active attempt only if it is still the
//! one the caller observed. Both report `CoreError::StaleRecord` otherwise.
//! `PurgeExecutor::purge` re-checks eligibility under the same lock, so a
//! cancel that lands after the caller's read is never overridden.

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{AttemptRecord, UserId, UserRecord};

pub trait UserStore {
    /// Store a newly registered user.
    fn insert(&self, user: &UserRecord) -> Result<()>;

    fn load(&self, id: UserId) -> Result<Option<UserRecord>>;

    /// Persist `user` if nobody saved it since it was loaded, then bump its
    /// version in place.
    fn save(&self, user: &mut UserRecord) -> Result<()>;

    /// Users with `deletion_requested` set, pending or past grace.
    fn list_pending_deletions(&self) -> Result<Vec<UserRecord>>;
}

pub trait AttemptStore {
    /// The active record for the pair, if any. Expiry is not checked here.
    fn load_active(&self, user_id: UserId, quiz_id: &str) -> Result<Option<AttemptRecord>>;

    /// Clear `active` on every record for the pair. Returns how many changed.
    fn deactivate_all(&self, user_id: UserId, quiz_id: &str) -> Result<usize>;

    fn create(&self, record: &AttemptRecord) -> Result<()>;

    /// Deactivate prior records and insert `record` as one step, provided the
    /// active record is still `expected`.
    fn supersede(&self, expected: Option<&AttemptRecord>, record: &AttemptRecord) -> Result<()>;

    /// Delete records whose `expires_at` has passed. Returns how many.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Both halves of a quiz submission, which must land together.
pub trait SubmissionStore: UserStore + AttemptStore {
    /// `save` the user and `supersede` the active attempt as one step. If
    /// either check fails nothing is written.
    fn save_with_attempt(
        &self,
        user: &mut UserRecord,
        expected: Option<&AttemptRecord>,
        record: &AttemptRecord,
    ) -> Result<()>;
}

/// Removes a user and everything that hangs off it.
pub trait PurgeExecutor {
    /// Delete the user if, at `now`, its deletion is still requested and the
    /// scheduled time has passed. `NotFound` if it is gone, `StaleRecord` if
    /// it is no longer eligible.
    fn purge(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()>;
}
