//! In-process store backed by a single mutex.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{AttemptStore, PurgeExecutor, SubmissionStore, UserStore};
use crate::error::{CoreError, Result};
use crate::model::{AttemptRecord, UserId, UserRecord};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserRecord>,
    attempts: Vec<AttemptRecord>,
}

impl State {
    fn active_for(&self, user_id: UserId, quiz_id: &str) -> Option<&AttemptRecord> {
        self.attempts
            .iter()
            .filter(|a| a.active && a.user_id == user_id && a.quiz_id == quiz_id)
            .max_by_key(|a| a.timestamp)
    }

    fn check_user(&self, user: &UserRecord) -> Result<()> {
        let stored = self.users.get(&user.id).ok_or_else(|| CoreError::NotFound {
            entity: "user",
            id: user.id.to_string(),
        })?;
        if stored.version != user.version {
            return Err(CoreError::StaleRecord {
                entity: "user",
                id: user.id.to_string(),
            });
        }
        Ok(())
    }

    fn check_active(&self, expected: Option<&AttemptRecord>, record: &AttemptRecord) -> Result<()> {
        let current = self.active_for(record.user_id, &record.quiz_id).map(|a| a.id);
        if current != expected.map(|a| a.id) {
            return Err(CoreError::StaleRecord {
                entity: "attempt",
                id: format!("{}/{}", record.user_id, record.quiz_id),
            });
        }
        Ok(())
    }

    fn deactivate(&mut self, user_id: UserId, quiz_id: &str) -> usize {
        let mut changed = 0;
        for attempt in self
            .attempts
            .iter_mut()
            .filter(|a| a.active && a.user_id == user_id && a.quiz_id == quiz_id)
        {
            attempt.active = false;
            changed += 1;
        }
        changed
    }
}

/// Thread-safe in-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt record held, active or not.
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.lock().attempts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UserStore for MemoryStore {
    fn insert(&self, user: &UserRecord) -> Result<()> {
        let mut state = self.lock();
        if state.users.contains_key(&user.id) {
            return Err(CoreError::StaleRecord {
                entity: "user",
                id: user.id.to_string(),
            });
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    fn load(&self, id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    fn save(&self, user: &mut UserRecord) -> Result<()> {
        let mut state = self.lock();
        state.check_user(user)?;
        user.version += 1;
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    fn list_pending_deletions(&self) -> Result<Vec<UserRecord>> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.deletion_requested)
            .cloned()
            .collect())
    }
}

impl AttemptStore for MemoryStore {
    fn load_active(&self, user_id: UserId, quiz_id: &str) -> Result<Option<AttemptRecord>> {
        Ok(self.lock().active_for(user_id, quiz_id).cloned())
    }

    fn deactivate_all(&self, user_id: UserId, quiz_id: &str) -> Result<usize> {
        Ok(self.lock().deactivate(user_id, quiz_id))
    }

    fn create(&self, record: &AttemptRecord) -> Result<()> {
        self.lock().attempts.push(record.clone());
        Ok(())
    }

    fn supersede(&self, expected: Option<&AttemptRecord>, record: &AttemptRecord) -> Result<()> {
        let mut state = self.lock();
        state.check_active(expected, record)?;
        state.deactivate(record.user_id, &record.quiz_id);
        state.attempts.push(record.clone());
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.lock();
        let before = state.attempts.len();
        state.attempts.retain(|a| !a.is_expired(now));
        Ok(before - state.attempts.len())
    }
}

impl SubmissionStore for MemoryStore {
    fn save_with_attempt(
        &self,
        user: &mut UserRecord,
        expected: Option<&AttemptRecord>,
        record: &AttemptRecord,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check_user(user)?;
        state.check_active(expected, record)?;

        state.deactivate(record.user_id, &record.quiz_id);
        state.attempts.push(record.clone());
        user.version += 1;
        state.users.insert(user.id, user.clone());
        Ok(())
    }
}

impl PurgeExecutor for MemoryStore {
    fn purge(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.lock();
        let user = state.users.get(&user_id).ok_or_else(|| CoreError::NotFound {
            entity: "user",
            id: user_id.to_string(),
        })?;
        let due = user.deletion_requested
            && user.deletion_scheduled_for.is_some_and(|at| at <= now);
        if !due {
            return Err(CoreError::StaleRecord {
                entity: "user",
                id: user_id.to_string(),
            });
        }
        state.users.remove(&user_id);
        state.attempts.retain(|a| a.user_id != user_id);
        Ok(())
    }
}
