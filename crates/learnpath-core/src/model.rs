//! Persisted records shared by the engine components.
//!
//! Components never call each other; they compose only through these
//! records, which the caller loads, hands to a component and saves back.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Opaque user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(UserId)
            .map_err(|_| ValidationError::InvalidId {
                field: "user_id".into(),
                value: s.to_string(),
            })
    }
}

/// Proficiency tier. Ordered low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Beginner => "beginner",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
        }
    }

    /// The tier above this one, if any.
    pub fn next(self) -> Option<Level> {
        match self {
            Level::Beginner => Some(Level::Intermediate),
            Level::Intermediate => Some(Level::Advanced),
            Level::Advanced => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beginner" => Ok(Level::Beginner),
            "intermediate" => Ok(Level::Intermediate),
            "advanced" => Ok(Level::Advanced),
            other => Err(ValidationError::InvalidValue {
                field: "level".into(),
                message: format!("unknown level '{other}'"),
            }),
        }
    }
}

/// One registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    /// Derived from `completed_module_count`; never set by callers.
    pub level: Level,
    pub total_points: u64,
    pub completed_module_count: u32,
    /// Module ids already counted, so repeated completions are no-ops.
    #[serde(default)]
    pub completed_modules: BTreeSet<String>,
    pub streak: u32,
    /// Calendar date of the last streak-affecting action.
    pub last_activity_date: Option<NaiveDate>,
    pub weekly_progress: u32,
    pub weekly_goal: u32,
    pub deletion_requested: bool,
    pub deletion_requested_at: Option<DateTime<Utc>>,
    pub deletion_scheduled_for: Option<DateTime<Utc>>,
    pub deletion_reason: Option<String>,
    /// False while a deletion is pending.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency token, bumped by the store on every save.
    #[serde(default)]
    pub version: u64,
}

impl UserRecord {
    /// A freshly registered user.
    pub fn new(weekly_goal: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            level: Level::Beginner,
            total_points: 0,
            completed_module_count: 0,
            completed_modules: BTreeSet::new(),
            streak: 0,
            last_activity_date: None,
            weekly_progress: 0,
            weekly_goal,
            deletion_requested: false,
            deletion_requested_at: None,
            deletion_scheduled_for: None,
            deletion_reason: None,
            active: true,
            created_at: now,
            version: 0,
        }
    }

    pub fn has_completed(&self, module_id: &str) -> bool {
        self.completed_modules.contains(module_id)
    }
}

/// Which of the two permitted attempts a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AttemptNumber {
    First,
    Second,
}

impl AttemptNumber {
    pub fn as_u8(self) -> u8 {
        match self {
            AttemptNumber::First => 1,
            AttemptNumber::Second => 2,
        }
    }
}

impl From<AttemptNumber> for u8 {
    fn from(n: AttemptNumber) -> u8 {
        n.as_u8()
    }
}

impl TryFrom<u8> for AttemptNumber {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AttemptNumber::First),
            2 => Ok(AttemptNumber::Second),
            other => Err(ValidationError::InvalidValue {
                field: "attempt_number".into(),
                message: format!("expected 1 or 2, got {other}"),
            }),
        }
    }
}

impl fmt::Display for AttemptNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A quiz attempt for one (user, quiz) pair.
///
/// Records are superseded, not mutated: a new attempt deactivates every prior
/// record for the pair and inserts a fresh one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub quiz_id: String,
    pub attempt_number: AttemptNumber,
    pub timestamp: DateTime<Utc>,
    /// Set only on second attempts.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub active: bool,
    pub expires_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(
        user_id: UserId,
        quiz_id: impl Into<String>,
        attempt_number: AttemptNumber,
        now: DateTime<Utc>,
        cooldown: Duration,
        ttl: Duration,
    ) -> Self {
        let cooldown_until = match attempt_number {
            AttemptNumber::Second => Some(now + cooldown),
            AttemptNumber::First => None,
        };
        Self {
            id: Uuid::new_v4(),
            user_id,
            quiz_id: quiz_id.into(),
            attempt_number,
            timestamp: now,
            cooldown_until,
            active: true,
            expires_at: now + ttl,
        }
    }

    /// Past its relevance window, whatever the `active` flag says.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the throttle may rely on this record at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }
}
