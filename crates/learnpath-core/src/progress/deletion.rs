//! Grace-period account deletion.
//!
//! A request deactivates the account and schedules removal after the grace
//! period. Cancelling restores it. The purge itself belongs to a
//! [`PurgeExecutor`](crate::store::PurgeExecutor); this module only answers
//! whether a user is eligible.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::model::UserRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionPolicy {
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
    /// Longer reasons are truncated, in characters
    #[serde(default = "default_max_reason_len")]
    pub max_reason_len: usize,
}

fn default_grace_period_days() -> i64 {
    7
}
fn default_max_reason_len() -> usize {
    500
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            max_reason_len: default_max_reason_len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionState {
    Active,
    Pending,
    GracePeriodExpired,
}

impl DeletionState {
    /// Phrase used in `InvalidTransition` errors.
    pub fn describe(self) -> &'static str {
        match self {
            DeletionState::Active => "account is active",
            DeletionState::Pending => "deletion is pending",
            DeletionState::GracePeriodExpired => "deletion grace period has expired",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeletionScheduler {
    policy: DeletionPolicy,
}

impl DeletionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DeletionPolicy) -> Self {
        Self { policy }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::days(self.policy.grace_period_days)
    }

    pub fn state(&self, user: &UserRecord, now: DateTime<Utc>) -> DeletionState {
        if !user.deletion_requested {
            DeletionState::Active
        } else if self.is_pending(user, now) {
            DeletionState::Pending
        } else {
            DeletionState::GracePeriodExpired
        }
    }

    /// Schedule deletion. Only valid while no deletion is requested.
    pub fn request_deletion(
        &self,
        user: &mut UserRecord,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if user.deletion_requested {
            return Err(CoreError::InvalidTransition {
                from: self.state(user, now).describe(),
                action: "request deletion",
            });
        }

        let scheduled_for = now + self.grace_period();
        user.deletion_requested = true;
        user.deletion_requested_at = Some(now);
        user.deletion_scheduled_for = Some(scheduled_for);
        user.deletion_reason = reason.and_then(|r| self.normalize_reason(r));
        user.active = false;

        tracing::info!(user_id = %user.id, %scheduled_for, "account deletion scheduled");
        Ok(())
    }

    /// Withdraw a pending request and reactivate the account. Only valid
    /// before the scheduled time.
    pub fn cancel_deletion(&self, user: &mut UserRecord, now: DateTime<Utc>) -> Result<()> {
        let state = self.state(user, now);
        if state != DeletionState::Pending {
            return Err(CoreError::InvalidTransition {
                from: state.describe(),
                action: "cancel deletion",
            });
        }

        user.deletion_requested = false;
        user.deletion_requested_at = None;
        user.deletion_scheduled_for = None;
        user.deletion_reason = None;
        user.active = true;

        tracing::info!(user_id = %user.id, "account deletion cancelled");
        Ok(())
    }

    pub fn is_pending(&self, user: &UserRecord, now: DateTime<Utc>) -> bool {
        user.deletion_requested
            && user
                .deletion_scheduled_for
                .map(|at| now < at)
                .unwrap_or(false)
    }

    pub fn is_eligible_for_purge(&self, user: &UserRecord, now: DateTime<Utc>) -> bool {
        user.deletion_requested
            && user
                .deletion_scheduled_for
                .map(|at| now >= at)
                .unwrap_or(false)
    }

    fn normalize_reason(&self, reason: &str) -> Option<String> {
        let trimmed = reason.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(trimmed.chars().take(self.policy.max_reason_len).collect())
    }
}
