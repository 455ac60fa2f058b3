//! Password expiry policy
//!
//! The warning tier is a pure function of days remaining
//! ([`PasswordWarningLevel::from_days_remaining`]). This module decides whether
//! an account is subject to expiry at all and where its window ends.

use helpdesk_shared::{PasswordStatus, PasswordWarningLevel, UserRole};
use time::{Duration, OffsetDateTime};

use crate::config::Config;

const SECONDS_PER_DAY: i64 = 86_400;

/// Role-gated password expiry policy
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub expiry_days: i64,
    pub enforced_roles: Vec<UserRole>,
}

impl PasswordPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            expiry_days: config.password_expiry_days,
            enforced_roles: config.password_expiry_roles.clone(),
        }
    }

    pub fn applies_to(&self, role: UserRole) -> bool {
        self.expiry_days > 0 && self.enforced_roles.contains(&role)
    }

    /// End of a fresh expiry window starting at `from`
    pub fn next_expiry(&self, from: OffsetDateTime) -> OffsetDateTime {
        from + Duration::days(self.expiry_days)
    }

    /// Compute the account's password status at `now`.
    ///
    /// `expires_at` falls back to `changed_at + expiry_days` when the column
    /// was never populated. A manual block applies regardless of role.
    pub fn status(
        &self,
        role: UserRole,
        changed_at: OffsetDateTime,
        expires_at: Option<OffsetDateTime>,
        manually_blocked: bool,
        now: OffsetDateTime,
    ) -> PasswordStatus {
        if !self.applies_to(role) {
            return PasswordStatus {
                enforced: false,
                days_remaining: None,
                level: PasswordWarningLevel::None,
                expires_at: None,
                blocked: manually_blocked,
            };
        }

        let expires_at = expires_at.unwrap_or_else(|| self.next_expiry(changed_at));
        let days_remaining = days_until(expires_at, now);
        let level = PasswordWarningLevel::from_days_remaining(days_remaining);

        PasswordStatus {
            enforced: true,
            days_remaining: Some(days_remaining),
            level,
            expires_at: Some(expires_at),
            blocked: manually_blocked || level.is_expired(),
        }
    }
}

/// Whole days until `deadline`, counting a partial day as a full one
pub fn days_until(deadline: OffsetDateTime, now: OffsetDateTime) -> i64 {
    let seconds = (deadline - now).whole_seconds();
    if seconds > 0 {
        (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
    } else {
        seconds / SECONDS_PER_DAY
    }
}
