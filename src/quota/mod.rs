/// Daily request quotas
///
/// Usage is counted per (account, UTC day). A day is the integer
/// division of the unix timestamp; rollover needs no job because a new
/// day simply keys a new record.

pub mod tracker;

pub use tracker::QuotaTracker;

use crate::subscriptions::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// UTC day index of an instant, floor division so pre-epoch instants
/// bucket correctly too
pub fn day_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(SECONDS_PER_DAY)
}

/// First instant after a bucket, when counting starts over
pub fn bucket_resets_at(bucket: i64) -> DateTime<Utc> {
    DateTime::from_timestamp((bucket + 1).saturating_mul(SECONDS_PER_DAY), 0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Outcome of an allowed metering check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub account_key: String,
    pub tier: Tier,
    pub day_bucket: i64,
    pub used: i64,
    /// Cap in force for this check; None is unmetered
    pub limit: Option<i64>,
    /// Requests left today; None when unmetered
    pub remaining: Option<i64>,
    pub resets_at: DateTime<Utc>,
}
