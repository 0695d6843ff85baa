mod attempts;
mod deletion;
mod level;
mod streak;

pub use attempts::{AttemptDecision, AttemptPolicy, AttemptReason, AttemptThrottle};
pub use deletion::{DeletionPolicy, DeletionScheduler, DeletionState};
pub use level::{LevelProgress, LevelProgression, LevelThresholds};
pub use streak::{StreakChange, StreakTracker, StreakUpdate};
