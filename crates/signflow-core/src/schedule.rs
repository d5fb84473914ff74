//! Reminder schedules
//!
//! The engine holds no timers. A policy only describes the instants before
//! expiry at which a nudge is appropriate; an external trigger polls
//! [`ReminderPolicy::is_due`] and calls the same send-reminder operation a
//! human would.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Day-offsets before expiry at which to remind, plus a final nudge a few
/// hours before the request lapses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderPolicy {
    /// Days before expiry, e.g. `[7, 3, 1]`.
    pub days_before_expiry: Vec<u32>,
    /// Hours before expiry for the final reminder.
    pub final_hours: u32,
}

impl ReminderPolicy {
    /// All scheduled reminder instants for a request expiring at
    /// `expires_at`, earliest first, deduplicated.
    pub fn scheduled_instants(&self, expires_at: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut instants: Vec<DateTime<Utc>> = self
            .days_before_expiry
            .iter()
            .map(|d| expires_at - Duration::days(*d as i64))
            .chain(std::iter::once(
                expires_at - Duration::hours(self.final_hours as i64),
            ))
            .collect();
        instants.sort();
        instants.dedup();
        instants
    }

    /// Whether a reminder is due now: some scheduled instant has passed that
    /// no reminder has been sent at or after.
    pub fn is_due(
        &self,
        expires_at: DateTime<Utc>,
        last_sent: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if now >= expires_at {
            return false;
        }
        self.scheduled_instants(expires_at)
            .into_iter()
            .any(|at| at <= now && last_sent.map_or(true, |sent| sent < at))
    }
}
