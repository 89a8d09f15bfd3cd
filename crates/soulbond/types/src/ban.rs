//! Ban records
//!
//! A ban is a timed exclusion created on death. Expiry is observed on read,
//! nothing fires at the expiry instant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::PlayerId;

/// An active timed ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    /// Banned player
    pub player_id: PlayerId,

    /// Name at the time of the ban, used for name lookups and notices
    pub display_name: String,

    /// Tier the ban was issued at
    pub tier: u32,

    /// When the ban started
    pub start_time: DateTime<Utc>,

    /// When the ban ends (always after `start_time`)
    pub end_time: DateTime<Utc>,
}

impl BanEntry {
    /// Whether the ban has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_time <= now
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.is_expired(now) {
            Duration::zero()
        } else {
            self.end_time - now
        }
    }
}

/// Render a remaining duration the way notices show it (`2h 5m`, `4m 10s`, `45s`).
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
