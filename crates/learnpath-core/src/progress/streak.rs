//! Daily study-streak computation.
//!
//! Streaks are counted in whole UTC calendar days. Time-of-day never matters:
//! two actions on the same date are the same day.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::UserRecord;

/// Result of one streak evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakUpdate {
    pub change: StreakChange,
    pub streak: u32,
    pub last_activity_date: NaiveDate,
    /// The week rolled over since the last activity; zero `weekly_progress`.
    pub weekly_progress_reset: bool,
    /// Whether `streak` or `last_activity_date` differ from the input record.
    pub changed: bool,
}

/// How the streak moved relative to the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    Started,
    SameDay,
    Extended,
    Broken,
    Backdated,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreakTracker;

impl StreakTracker {
    pub fn new() -> Self {
        Self
    }

    /// Classify the gap between the stored activity date and `today`.
    pub fn classify(last: Option<NaiveDate>, today: NaiveDate) -> StreakChange {
        let Some(last) = last else {
            return StreakChange::Started;
        };
        match (today - last).num_days() {
            0 => StreakChange::SameDay,
            1 => StreakChange::Extended,
            d if d > 1 => StreakChange::Broken,
            _ => StreakChange::Backdated,
        }
    }

    /// Compute the streak for an action performed at `now`.
    pub fn update_streak(&self, user: &UserRecord, now: DateTime<Utc>) -> StreakUpdate {
        let today = now.date_naive();
        let change = Self::classify(user.last_activity_date, today);

        let (streak, last_activity_date) = match change {
            StreakChange::Started => (1, today),
            StreakChange::Extended => (user.streak.saturating_add(1), today),
            StreakChange::Broken => (1, today),
            StreakChange::SameDay => (user.streak, today),
            StreakChange::Backdated => {
                tracing::warn!(
                    user_id = %user.id,
                    last_activity = ?user.last_activity_date,
                    %today,
                    "activity dated before last recorded activity; streak left unchanged"
                );
                // Keep the later stored date so the streak cannot slide backwards.
                (user.streak, user.last_activity_date.unwrap_or(today))
            }
        };

        let weekly_progress_reset = user
            .last_activity_date
            .map(|last| iso_week_key(today) > iso_week_key(last))
            .unwrap_or(false);

        tracing::debug!(
            user_id = %user.id,
            ?change,
            streak,
            weekly_progress_reset,
            "streak evaluated"
        );

        StreakUpdate {
            change,
            streak,
            last_activity_date,
            weekly_progress_reset,
            changed: streak != user.streak
                || Some(last_activity_date) != user.last_activity_date,
        }
    }

    /// Write an update back onto the record.
    pub fn apply(user: &mut UserRecord, update: &StreakUpdate) {
        user.streak = update.streak;
        user.last_activity_date = Some(update.last_activity_date);
        if update.weekly_progress_reset {
            user.weekly_progress = 0;
        }
    }
}

/// (ISO year, ISO week) so that week 1 of a new year sorts after week 52.
fn iso_week_key(date: NaiveDate) -> (i32, u32) {
    let week = date.iso_week();
    (week.year(), week.week())
}
