//! # learnpath Core Library
//!
//! The progression and attempt-throttling engine behind the learnpath
//! study app. It turns timestamped user actions (finishing a module,
//! submitting a quiz, asking for account deletion) into derived state.
//!
//! ## Architecture
//!
//! - **Engine** ([`progress`]): four pure components working on record
//!   snapshots. None of them does I/O or calls another.
//! - **Collaborators** ([`store`], [`clock`]): traits the engine consumes for
//!   persistence and time, with in-memory and SQLite implementations.
//! - **Service** ([`service`]): the caller that loads a record, runs one
//!   component and saves the result.
//!
//! ## Key Components
//!
//! - [`StreakTracker`]: consecutive-day study streak and weekly reset
//! - [`LevelProgression`]: module-count tiers and progress-bar percentage
//! - [`AttemptThrottle`]: two attempts, then a cooldown
//! - [`DeletionScheduler`]: grace-period account deletion
//! - [`Database`]: SQLite store implementing every collaborator trait

pub mod clock;
pub mod error;
pub mod events;
pub mod model;
pub mod progress;
pub mod service;
pub mod storage;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, Result, ValidationError};
pub use events::Event;
pub use model::{AttemptNumber, AttemptRecord, Level, UserId, UserRecord};
pub use progress::{
    AttemptDecision, AttemptReason, AttemptThrottle, DeletionScheduler, DeletionState,
    LevelProgress, LevelProgression, StreakTracker, StreakUpdate,
};
pub use service::ProgressService;
pub use storage::{Config, Database};
pub use store::{AttemptStore, MemoryStore, PurgeExecutor, SubmissionStore, UserStore};
