use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AttemptNumber, Level, UserId};
use crate::progress::StreakChange;

/// Every state change made by the service produces an Event.
/// Callers forward them to notification or analytics consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    ModuleCompleted {
        user_id: UserId,
        module_id: String,
        points: u64,
        at: DateTime<Utc>,
    },
    StreakUpdated {
        user_id: UserId,
        change: StreakChange,
        streak: u32,
        date: NaiveDate,
    },
    /// A new ISO week started; weekly progress went back to zero.
    WeeklyProgressReset {
        user_id: UserId,
        at: DateTime<Utc>,
    },
    LevelUp {
        user_id: UserId,
        from: Level,
        to: Level,
        at: DateTime<Utc>,
    },
    AttemptRegistered {
        user_id: UserId,
        quiz_id: String,
        attempt_number: AttemptNumber,
        cooldown_until: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },
    DeletionRequested {
        user_id: UserId,
        scheduled_for: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    DeletionCancelled {
        user_id: UserId,
        at: DateTime<Utc>,
    },
    UserPurged {
        user_id: UserId,
        at: DateTime<Utc>,
    },
}
