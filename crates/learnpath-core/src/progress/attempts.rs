//! Two-strike-then-cooldown quiz attempt throttle.
//!
//! ## States per (user, quiz)
//!
//! - **NoRecord**: nothing live; the next attempt is the first
//! - **First**: one attempt used; the second is allowed immediately
//! - **Second**: both used; blocked until `cooldown_until`, then the cycle restarts
//!
//! A record older than its TTL counts as absent even if it is still flagged
//! active, so a missed sweep never blocks a user.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::model::{AttemptNumber, AttemptRecord, UserId};
use crate::store::AttemptStore;

/// Windows applied to attempt records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptPolicy {
    /// Lockout after a second attempt (minutes)
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Lifetime of any attempt record (hours)
    #[serde(default = "default_record_ttl_hours")]
    pub record_ttl_hours: i64,
}

fn default_cooldown_minutes() -> i64 {
    30
}
fn default_record_ttl_hours() -> i64 {
    24
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            cooldown_minutes: default_cooldown_minutes(),
            record_ttl_hours: default_record_ttl_hours(),
        }
    }
}

impl AttemptPolicy {
    pub fn cooldown(&self) -> Duration {
        Duration::minutes(self.cooldown_minutes)
    }

    pub fn ttl(&self) -> Duration {
        Duration::hours(self.record_ttl_hours)
    }
}

/// Why an attempt was allowed or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptReason {
    FirstAttempt,
    SecondAttempt,
    Cooldown,
    CooldownExpired,
}

impl AttemptReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptReason::FirstAttempt => "first_attempt",
            AttemptReason::SecondAttempt => "second_attempt",
            AttemptReason::Cooldown => "cooldown",
            AttemptReason::CooldownExpired => "cooldown_expired",
        }
    }
}

impl fmt::Display for AttemptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptDecision {
    pub allowed: bool,
    pub attempt_number: AttemptNumber,
    pub reason: AttemptReason,
    /// Whole minutes left, rounded up; only set while cooling down.
    pub cooldown_remaining_minutes: Option<i64>,
}

impl AttemptDecision {
    fn allow(attempt_number: AttemptNumber, reason: AttemptReason) -> Self {
        Self {
            allowed: true,
            attempt_number,
            reason,
            cooldown_remaining_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttemptThrottle {
    policy: AttemptPolicy,
}

impl AttemptThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: AttemptPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AttemptPolicy {
        &self.policy
    }

    /// Decide whether a new attempt may start at `now`.
    pub fn can_attempt(&self, record: Option<&AttemptRecord>, now: DateTime<Utc>) -> AttemptDecision {
        let Some(record) = record.filter(|r| r.is_live(now)) else {
            return AttemptDecision::allow(AttemptNumber::First, AttemptReason::FirstAttempt);
        };

        match record.attempt_number {
            AttemptNumber::First => {
                AttemptDecision::allow(AttemptNumber::Second, AttemptReason::SecondAttempt)
            }
            AttemptNumber::Second => match record.cooldown_until {
                Some(until) if now < until => AttemptDecision {
                    allowed: false,
                    attempt_number: AttemptNumber::Second,
                    reason: AttemptReason::Cooldown,
                    cooldown_remaining_minutes: Some(ceil_minutes(until - now)),
                },
                _ => AttemptDecision::allow(AttemptNumber::First, AttemptReason::CooldownExpired),
            },
        }
    }

    /// Build the record for a new attempt, or refuse it.
    pub fn plan_attempt(
        &self,
        current: Option<&AttemptRecord>,
        user_id: UserId,
        quiz_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord> {
        let decision = self.can_attempt(current, now);
        if !decision.allowed {
            return Err(CoreError::AttemptNotAllowed {
                reason: decision.reason,
                cooldown_remaining_minutes: decision.cooldown_remaining_minutes,
            });
        }
        Ok(AttemptRecord::new(
            user_id,
            quiz_id,
            decision.attempt_number,
            now,
            self.policy.cooldown(),
            self.policy.ttl(),
        ))
    }

    /// Register an attempt against the store.
    ///
    /// The prior active record is superseded in one step; if another writer
    /// changed it since it was read, the store reports `StaleRecord`.
    pub fn register_attempt<S: AttemptStore + ?Sized>(
        &self,
        store: &S,
        user_id: UserId,
        quiz_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord> {
        let current = store.load_active(user_id, quiz_id)?;
        let record = self.plan_attempt(current.as_ref(), user_id, quiz_id, now)?;
        store.supersede(current.as_ref(), &record)?;

        tracing::info!(
            %user_id,
            quiz_id,
            attempt = record.attempt_number.as_u8(),
            cooldown_until = ?record.cooldown_until,
            "quiz attempt registered"
        );
        Ok(record)
    }
}

fn ceil_minutes(remaining: Duration) -> i64 {
    let ms = remaining.num_milliseconds().max(0);
    (ms + 59_999) / 60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn no_record_allows_first_attempt() {
        let throttle = AttemptThrottle::new();
        let decision = throttle.can_attempt(None, start());
        assert!(decision.allowed);
        assert_eq!(decision.attempt_number, AttemptNumber::First);
        assert_eq!(decision.reason, AttemptReason::FirstAttempt);
        assert_eq!(decision.cooldown_remaining_minutes, None);
    }

    #[test]
    fn full_cycle_through_cooldown() {
        let throttle = AttemptThrottle::new();
        let store = MemoryStore::new();
        let user = UserId::new();
        let now = start();

        let first = throttle.register_attempt(&store, user, "quiz-a", now).unwrap();
        assert_eq!(first.attempt_number, AttemptNumber::First);

        let active = store.load_active(user, "quiz-a").unwrap();
        let decision = throttle.can_attempt(active.as_ref(), now);
        assert!(decision.allowed);
        assert_eq!(decision.attempt_number, AttemptNumber::Second);
        assert_eq!(decision.reason, AttemptReason::SecondAttempt);

        let second = throttle.register_attempt(&store, user, "quiz-a", now).unwrap();
        assert_eq!(second.cooldown_until, Some(now + Duration::minutes(30)));

        let active = store.load_active(user, "quiz-a").unwrap();
        let decision = throttle.can_attempt(active.as_ref(), now);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, AttemptReason::Cooldown);
        assert_eq!(decision.cooldown_remaining_minutes, Some(30));

        let later = now + Duration::minutes(31);
        let decision = throttle.can_attempt(active.as_ref(), later);
        assert!(decision.allowed);
        assert_eq!(decision.attempt_number, AttemptNumber::First);
        assert_eq!(decision.reason, AttemptReason::CooldownExpired);
    }

    #[test]
    fn registering_during_cooldown_is_rejected() {
        let throttle = AttemptThrottle::new();
        let store = MemoryStore::new();
        let user = UserId::new();
        let now = start();
        throttle.register_attempt(&store, user, "quiz-a", now).unwrap();
        throttle.register_attempt(&store, user, "quiz-a", now).unwrap();

        let err = throttle
            .register_attempt(&store, user, "quiz-a", now + Duration::minutes(10))
            .unwrap_err();
        match err {
            CoreError::AttemptNotAllowed {
                reason,
                cooldown_remaining_minutes,
            } => {
                assert_eq!(reason, AttemptReason::Cooldown);
                assert_eq!(cooldown_remaining_minutes, Some(20));
            }
            other => panic!("unexpected error: {other}"),
        }
        let active = store.load_active(user, "quiz-a").unwrap().unwrap();
        assert_eq!(active.attempt_number, AttemptNumber::Second);
    }

    #[test]
    fn remaining_minutes_round_up() {
        let throttle = AttemptThrottle::new();
        let record = AttemptRecord::new(
            UserId::new(),
            "q",
            AttemptNumber::Second,
            start(),
            Duration::minutes(30),
            Duration::hours(24),
        );
        let now = start() + Duration::seconds(29 * 60 + 1);
        let decision = throttle.can_attempt(Some(&record), now);
        assert_eq!(decision.cooldown_remaining_minutes, Some(1));
    }

    #[test]
    fn expired_record_is_treated_as_absent() {
        let throttle = AttemptThrottle::new();
        let record = AttemptRecord::new(
            UserId::new(),
            "q",
            AttemptNumber::First,
            start(),
            Duration::minutes(30),
            Duration::hours(24),
        );
        assert!(record.active);
        let decision = throttle.can_attempt(Some(&record), start() + Duration::hours(24));
        assert_eq!(decision.attempt_number, AttemptNumber::First);
        assert_eq!(decision.reason, AttemptReason::FirstAttempt);
    }

    #[test]
    fn inactive_record_is_ignored() {
        let throttle = AttemptThrottle::new();
        let mut record = AttemptRecord::new(
            UserId::new(),
            "q",
            AttemptNumber::Second,
            start(),
            Duration::minutes(30),
            Duration::hours(24),
        );
        record.active = false;
        let decision = throttle.can_attempt(Some(&record), start());
        assert!(decision.allowed);
        assert_eq!(decision.reason, AttemptReason::FirstAttempt);
    }

    #[test]
    fn second_attempt_without_cooldown_restarts_cycle() {
        let throttle = AttemptThrottle::new();
        let mut record = AttemptRecord::new(
            UserId::new(),
            "q",
            AttemptNumber::Second,
            start(),
            Duration::minutes(30),
            Duration::hours(24),
        );
        record.cooldown_until = None;
        let decision = throttle.can_attempt(Some(&record), start());
        assert_eq!(decision.reason, AttemptReason::CooldownExpired);
    }

    #[test]
    fn pairs_are_throttled_independently() {
        let throttle = AttemptThrottle::new();
        let store = MemoryStore::new();
        let user = UserId::new();
        let now = start();
        throttle.register_attempt(&store, user, "quiz-a", now).unwrap();
        throttle.register_attempt(&store, user, "quiz-a", now).unwrap();

        let other = throttle.register_attempt(&store, user, "quiz-b", now).unwrap();
        assert_eq!(other.attempt_number, AttemptNumber::First);
    }

    #[test]
    fn custom_policy_shortens_cooldown() {
        let throttle = AttemptThrottle::with_policy(AttemptPolicy {
            cooldown_minutes: 5,
            record_ttl_hours: 1,
        });
        let record = throttle
            .plan_attempt(
                Some(&AttemptRecord::new(
                    UserId::new(),
                    "q",
                    AttemptNumber::First,
                    start(),
                    Duration::minutes(5),
                    Duration::hours(1),
                )),
                UserId::new(),
                "q",
                start(),
            )
            .unwrap();
        assert_eq!(record.cooldown_until, Some(start() + Duration::minutes(5)));
        assert_eq!(record.expires_at, start() + Duration::hours(1));
    }
}
