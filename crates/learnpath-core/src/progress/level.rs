//! Tiered level progression.
//!
//! Two threshold tables exist. Completed-module counts decide the level
//! itself; point totals only feed the progress percentage shown to the user.
//! Levels move upward only: a lower count never demotes a user here.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::Level;

/// Module and point thresholds for each tier above Beginner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelThresholds {
    #[serde(default = "default_intermediate_modules")]
    pub intermediate_modules: u32,
    #[serde(default = "default_advanced_modules")]
    pub advanced_modules: u32,
    #[serde(default = "default_intermediate_points")]
    pub intermediate_points: u64,
    #[serde(default = "default_advanced_points")]
    pub advanced_points: u64,
}

fn default_intermediate_modules() -> u32 {
    16
}
fn default_advanced_modules() -> u32 {
    32
}
fn default_intermediate_points() -> u64 {
    150
}
fn default_advanced_points() -> u64 {
    300
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            intermediate_modules: default_intermediate_modules(),
            advanced_modules: default_advanced_modules(),
            intermediate_points: default_intermediate_points(),
            advanced_points: default_advanced_points(),
        }
    }
}

impl LevelThresholds {
    /// Both tables must be strictly increasing and non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intermediate_modules == 0 || self.intermediate_modules >= self.advanced_modules {
            return Err(ConfigError::InvalidValue {
                key: "levels.advanced_modules".into(),
                message: format!(
                    "module thresholds must satisfy 0 < intermediate ({}) < advanced ({})",
                    self.intermediate_modules, self.advanced_modules
                ),
            });
        }
        if self.intermediate_points == 0 || self.intermediate_points >= self.advanced_points {
            return Err(ConfigError::InvalidValue {
                key: "levels.advanced_points".into(),
                message: format!(
                    "point thresholds must satisfy 0 < intermediate ({}) < advanced ({})",
                    self.intermediate_points, self.advanced_points
                ),
            });
        }
        Ok(())
    }

    fn modules_for(&self, level: Level) -> u32 {
        match level {
            Level::Beginner => 0,
            Level::Intermediate => self.intermediate_modules,
            Level::Advanced => self.advanced_modules,
        }
    }

    fn points_for(&self, level: Level) -> u64 {
        match level {
            Level::Beginner => 0,
            Level::Intermediate => self.intermediate_points,
            Level::Advanced => self.advanced_points,
        }
    }
}

/// Progress toward the tier above `current_level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub current_level: Level,
    pub next_level: Option<Level>,
    /// 0..=100, the better of module and point progress.
    pub percentage: u8,
    pub requirement: String,
}

#[derive(Debug, Clone, Default)]
pub struct LevelProgression {
    thresholds: LevelThresholds,
}

impl LevelProgression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: LevelThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &LevelThresholds {
        &self.thresholds
    }

    /// The tier implied by a completed-module count.
    pub fn compute_level(&self, completed_module_count: u32) -> Level {
        if completed_module_count >= self.thresholds.advanced_modules {
            Level::Advanced
        } else if completed_module_count >= self.thresholds.intermediate_modules {
            Level::Intermediate
        } else {
            Level::Beginner
        }
    }

    /// Raise `current` to the computed tier; never lowers it.
    pub fn promote(&self, current: Level, completed_module_count: u32) -> Level {
        let computed = self.compute_level(completed_module_count);
        if computed < current {
            tracing::warn!(
                %current,
                %computed,
                completed_module_count,
                "module count implies a lower level; keeping current level"
            );
        }
        current.max(computed)
    }

    pub fn progress_to_next_level(
        &self,
        completed_module_count: u32,
        total_points: u64,
        current_level: Level,
    ) -> LevelProgress {
        let Some(next) = current_level.next() else {
            return LevelProgress {
                current_level,
                next_level: None,
                percentage: 100,
                requirement: "maximum level reached".to_string(),
            };
        };

        let module_target = self.thresholds.modules_for(next);
        let point_target = self.thresholds.points_for(next);
        let module_pct = percent(u64::from(completed_module_count), u64::from(module_target));
        let points_pct = percent(total_points, point_target);

        LevelProgress {
            current_level,
            next_level: Some(next),
            percentage: module_pct.max(points_pct),
            requirement: format!("reach {module_target} completed modules"),
        }
    }
}

fn percent(value: u64, target: u64) -> u8 {
    if target == 0 {
        return 100;
    }
    (value.saturating_mul(100) / target).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tier_boundaries() {
        let levels = LevelProgression::new();
        assert_eq!(levels.compute_level(0), Level::Beginner);
        assert_eq!(levels.compute_level(15), Level::Beginner);
        assert_eq!(levels.compute_level(16), Level::Intermediate);
        assert_eq!(levels.compute_level(31), Level::Intermediate);
        assert_eq!(levels.compute_level(32), Level::Advanced);
        assert_eq!(levels.compute_level(500), Level::Advanced);
    }

    #[test]
    fn points_alone_never_change_level() {
        let levels = LevelProgression::new();
        let progress = levels.progress_to_next_level(2, 10_000, Level::Beginner);
        assert_eq!(progress.next_level, Some(Level::Intermediate));
        assert_eq!(progress.percentage, 100);
        assert_eq!(levels.compute_level(2), Level::Beginner);
    }

    #[test]
    fn percentage_takes_better_of_modules_and_points() {
        let levels = LevelProgression::new();
        // 8/16 modules = 50%, 30/150 points = 20%.
        let progress = levels.progress_to_next_level(8, 30, Level::Beginner);
        assert_eq!(progress.percentage, 50);
        // 8/16 modules = 50%, 120/150 points = 80%.
        let progress = levels.progress_to_next_level(8, 120, Level::Beginner);
        assert_eq!(progress.percentage, 80);
        assert_eq!(progress.requirement, "reach 16 completed modules");
    }

    #[test]
    fn requirement_follows_configured_thresholds() {
        let levels = LevelProgression::with_thresholds(LevelThresholds {
            intermediate_modules: 10,
            advanced_modules: 20,
            ..Default::default()
        });
        let progress = levels.progress_to_next_level(12, 0, Level::Intermediate);
        assert_eq!(progress.next_level, Some(Level::Advanced));
        assert_eq!(progress.requirement, "reach 20 completed modules");
        assert_eq!(progress.percentage, 60);
    }

    #[test]
    fn advanced_is_terminal() {
        let levels = LevelProgression::new();
        let progress = levels.progress_to_next_level(40, 0, Level::Advanced);
        assert_eq!(progress.next_level, None);
        assert_eq!(progress.percentage, 100);
    }

    #[test]
    fn promote_never_demotes() {
        let levels = LevelProgression::new();
        assert_eq!(levels.promote(Level::Advanced, 3), Level::Advanced);
        assert_eq!(levels.promote(Level::Beginner, 16), Level::Intermediate);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let thresholds = LevelThresholds {
            intermediate_modules: 32,
            advanced_modules: 16,
            ..Default::default()
        };
        assert!(thresholds.validate().is_err());
        assert!(LevelThresholds::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn level_is_monotonic_in_module_count(a in 0u32..200, b in 0u32..200) {
            let levels = LevelProgression::new();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(levels.compute_level(lo) <= levels.compute_level(hi));
        }

        #[test]
        fn promote_is_at_least_current(count in 0u32..200, idx in 0usize..3) {
            let levels = LevelProgression::new();
            let current = [Level::Beginner, Level::Intermediate, Level::Advanced][idx];
            prop_assert!(levels.promote(current, count) >= current);
        }

        #[test]
        fn percentage_is_capped(count in 0u32..1000, points in 0u64..100_000) {
            let levels = LevelProgression::new();
            let progress = levels.progress_to_next_level(count, points, levels.compute_level(count));
            prop_assert!(progress.percentage <= 100);
        }
    }
}
