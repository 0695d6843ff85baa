//! Caller-side orchestration of the engine.
//!
//! Each method plays one handler of the surrounding app (content completion,
//! quiz submission, account settings, maintenance): load the record, run one
//! component, persist the result. Conflicts from the store are returned as
//! `StaleRecord` with nothing written; retrying is up to whoever called the
//! service.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, Result, ValidationError};
use crate::events::Event;
use crate::model::{AttemptRecord, UserId, UserRecord};
use crate::progress::{
    AttemptDecision, AttemptThrottle, DeletionScheduler, DeletionState, LevelProgress,
    LevelProgression, StreakTracker,
};
use crate::storage::Config;
use crate::store::{PurgeExecutor, SubmissionStore};

/// A user record after a change, with the events it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdate {
    pub user: UserRecord,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCompletion {
    pub user: UserRecord,
    /// False when the module had already been counted.
    pub newly_completed: bool,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub user: UserRecord,
    pub attempt: AttemptRecord,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionStatus {
    pub state: DeletionState,
    pub requested_at: Option<chrono::DateTime<Utc>>,
    pub scheduled_for: Option<chrono::DateTime<Utc>>,
    pub reason: Option<String>,
    pub is_pending: bool,
    pub is_eligible_for_purge: bool,
}

pub struct ProgressService<S> {
    store: S,
    clock: Arc<dyn Clock>,
    streaks: StreakTracker,
    levels: LevelProgression,
    throttle: AttemptThrottle,
    deletion: DeletionScheduler,
    config: Config,
}

impl<S> ProgressService<S>
where
    S: SubmissionStore + PurgeExecutor,
{
    pub fn new(store: S, config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            streaks: StreakTracker::new(),
            levels: LevelProgression::with_thresholds(config.levels.clone()),
            throttle: AttemptThrottle::with_policy(config.attempts.clone()),
            deletion: DeletionScheduler::with_policy(config.deletion.clone()),
            config,
        }
    }

    /// Service on the wall clock.
    pub fn with_system_clock(store: S, config: Config) -> Self {
        Self::new(store, config, Arc::new(SystemClock))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn register_user(&self, weekly_goal: Option<u32>) -> Result<UserRecord> {
        let goal = weekly_goal.unwrap_or(self.config.progress.default_weekly_goal);
        let user = UserRecord::new(goal, self.clock.now());
        self.store.insert(&user)?;
        tracing::info!(user_id = %user.id, weekly_goal = goal, "user registered");
        Ok(user)
    }

    pub fn user(&self, id: UserId) -> Result<UserRecord> {
        self.store.load(id)?.ok_or_else(|| CoreError::NotFound {
            entity: "user",
            id: id.to_string(),
        })
    }

    /// Content-completion handler.
    pub fn complete_module(
        &self,
        id: UserId,
        module_id: &str,
        points: u64,
    ) -> Result<ModuleCompletion> {
        require_id("module_id", module_id)?;
        let now = self.clock.now();
        let mut user = self.user(id)?;
        self.ensure_active(&user, now, "complete a module")?;

        if user.has_completed(module_id) {
            tracing::debug!(user_id = %id, module_id, "module already completed; nothing counted");
            return Ok(ModuleCompletion {
                user,
                newly_completed: false,
                events: Vec::new(),
            });
        }

        let mut events = vec![Event::ModuleCompleted {
            user_id: id,
            module_id: module_id.to_string(),
            points,
            at: now,
        }];
        self.record_activity(&mut user, now, &mut events);

        user.completed_modules.insert(module_id.to_string());
        user.completed_module_count = user.completed_module_count.saturating_add(1);
        user.total_points = user.total_points.saturating_add(points);
        user.weekly_progress = user.weekly_progress.saturating_add(1);

        let before = user.level;
        user.level = self.levels.promote(user.level, user.completed_module_count);
        if user.level != before {
            tracing::info!(user_id = %id, from = %before, to = %user.level, "level up");
            events.push(Event::LevelUp {
                user_id: id,
                from: before,
                to: user.level,
                at: now,
            });
        }

        self.store.save(&mut user)?;
        Ok(ModuleCompletion {
            user,
            newly_completed: true,
            events,
        })
    }

    /// Whether the user may start `quiz_id` now.
    pub fn check_quiz(&self, id: UserId, quiz_id: &str) -> Result<AttemptDecision> {
        require_id("quiz_id", quiz_id)?;
        let now = self.clock.now();
        let user = self.user(id)?;
        self.ensure_active(&user, now, "attempt a quiz")?;
        let current = self.store.load_active(id, quiz_id)?;
        Ok(self.throttle.can_attempt(current.as_ref(), now))
    }

    /// Quiz-submission handler. The attempt and the user's points and streak
    /// are written in one step: a refused attempt or a conflict on either
    /// record leaves both untouched, so a retry sees the same attempt number.
    pub fn submit_quiz(&self, id: UserId, quiz_id: &str, points: u64) -> Result<QuizSubmission> {
        require_id("quiz_id", quiz_id)?;
        let now = self.clock.now();
        let mut user = self.user(id)?;
        self.ensure_active(&user, now, "attempt a quiz")?;

        let current = self.store.load_active(id, quiz_id)?;
        let attempt = self.throttle.plan_attempt(current.as_ref(), id, quiz_id, now)?;
        let mut events = vec![Event::AttemptRegistered {
            user_id: id,
            quiz_id: quiz_id.to_string(),
            attempt_number: attempt.attempt_number,
            cooldown_until: attempt.cooldown_until,
            at: now,
        }];

        self.record_activity(&mut user, now, &mut events);
        user.total_points = user.total_points.saturating_add(points);
        self.store.save_with_attempt(&mut user, current.as_ref(), &attempt)?;

        tracing::info!(
            user_id = %id,
            quiz_id,
            attempt = attempt.attempt_number.as_u8(),
            cooldown_until = ?attempt.cooldown_until,
            "quiz attempt registered"
        );
        Ok(QuizSubmission {
            user,
            attempt,
            events,
        })
    }

    pub fn level_progress(&self, id: UserId) -> Result<LevelProgress> {
        let user = self.user(id)?;
        Ok(self.levels.progress_to_next_level(
            user.completed_module_count,
            user.total_points,
            user.level,
        ))
    }

    /// Account-settings handler: schedule deletion.
    pub fn request_deletion(&self, id: UserId, reason: Option<&str>) -> Result<UserUpdate> {
        let now = self.clock.now();
        let mut user = self.user(id)?;
        self.deletion.request_deletion(&mut user, reason, now)?;
        self.store.save(&mut user)?;

        let scheduled_for = user.deletion_scheduled_for.unwrap_or(now);
        Ok(UserUpdate {
            user,
            events: vec![Event::DeletionRequested {
                user_id: id,
                scheduled_for,
                at: now,
            }],
        })
    }

    /// Account-settings handler: withdraw a deletion request.
    pub fn cancel_deletion(&self, id: UserId) -> Result<UserUpdate> {
        let now = self.clock.now();
        let mut user = self.user(id)?;
        self.deletion.cancel_deletion(&mut user, now)?;
        self.store.save(&mut user)?;
        Ok(UserUpdate {
            user,
            events: vec![Event::DeletionCancelled { user_id: id, at: now }],
        })
    }

    pub fn deletion_status(&self, id: UserId) -> Result<DeletionStatus> {
        let now = self.clock.now();
        let user = self.user(id)?;
        Ok(DeletionStatus {
            state: self.deletion.state(&user, now),
            requested_at: user.deletion_requested_at,
            scheduled_for: user.deletion_scheduled_for,
            reason: user.deletion_reason.clone(),
            is_pending: self.deletion.is_pending(&user, now),
            is_eligible_for_purge: self.deletion.is_eligible_for_purge(&user, now),
        })
    }

    /// Purge every user whose grace period has run out.
    ///
    /// Users that vanished or were cancelled since the list was read are
    /// skipped; the store re-checks eligibility before deleting.
    pub fn purge_due(&self) -> Result<Vec<Event>> {
        let now = self.clock.now();
        let mut events = Vec::new();
        for user in self.store.list_pending_deletions()? {
            if !self.deletion.is_eligible_for_purge(&user, now) {
                continue;
            }
            match self.store.purge(user.id, now) {
                Ok(()) => events.push(Event::UserPurged {
                    user_id: user.id,
                    at: now,
                }),
                Err(e @ (CoreError::NotFound { .. } | CoreError::StaleRecord { .. })) => {
                    tracing::warn!(user_id = %user.id, error = %e, "skipping purge");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(purged = events.len(), "purge sweep finished");
        Ok(events)
    }

    /// Drop attempt records past their TTL.
    pub fn sweep_attempts(&self) -> Result<usize> {
        let removed = self.store.sweep_expired(self.clock.now())?;
        tracing::info!(removed, "expired attempts swept");
        Ok(removed)
    }

    /// Administrative correction of counters. The level may rise with the
    /// new count but is never lowered; demotion needs its own policy.
    pub fn correct_counts(
        &self,
        id: UserId,
        completed_module_count: Option<u32>,
        total_points: Option<u64>,
    ) -> Result<UserUpdate> {
        let now = self.clock.now();
        let mut user = self.user(id)?;
        if let Some(count) = completed_module_count {
            user.completed_module_count = count;
        }
        if let Some(points) = total_points {
            user.total_points = points;
        }

        let mut events = Vec::new();
        let before = user.level;
        user.level = self.levels.promote(user.level, user.completed_module_count);
        if user.level != before {
            events.push(Event::LevelUp {
                user_id: id,
                from: before,
                to: user.level,
                at: now,
            });
        }

        self.store.save(&mut user)?;
        tracing::info!(
            user_id = %id,
            completed_module_count = user.completed_module_count,
            total_points = user.total_points,
            "counters corrected"
        );
        Ok(UserUpdate { user, events })
    }

    /// Progress actions are refused once deletion has been requested.
    fn ensure_active(
        &self,
        user: &UserRecord,
        now: chrono::DateTime<Utc>,
        action: &'static str,
    ) -> Result<()> {
        if user.deletion_requested {
            return Err(CoreError::InvalidTransition {
                from: self.deletion.state(user, now).describe(),
                action,
            });
        }
        Ok(())
    }

    fn record_activity(
        &self,
        user: &mut UserRecord,
        now: chrono::DateTime<Utc>,
        events: &mut Vec<Event>,
    ) {
        let update = self.streaks.update_streak(user, now);
        StreakTracker::apply(user, &update);

        if update.weekly_progress_reset {
            events.push(Event::WeeklyProgressReset {
                user_id: user.id,
                at: now,
            });
        }
        if update.changed {
            events.push(Event::StreakUpdated {
                user_id: user.id,
                change: update.change,
                streak: update.streak,
                date: update.last_activity_date,
            });
        }
    }
}

fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidId {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into());
    }
    Ok(())
}
