/// Database row models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Canonical account record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_key: String,
    pub created_at: DateTime<Utc>,
}

/// Single-use token record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: String,
    pub kind: String,   // "startup_invite", "team_invite" or "platform_link"
    pub code: String,
    pub issuer_id: String,
    pub subject_hint: String,
    pub email_hint: Option<String>,
    /// Platform pair a link token authorizes; NULL for invite kinds
    pub link_provider: Option<String>,
    pub link_external_id: Option<String>,
    pub status: String, // "pending", "used", "revoked" or "expired"
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub bound_account: Option<String>,
}

/// Platform identity link record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PlatformLink {
    pub provider: String,
    pub external_id: String,
    pub account_key: String,
    pub linked_at: DateTime<Utc>,
}

/// Per-day request counter record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageRecord {
    pub account_key: String,
    pub day_bucket: i64,
    pub requests_used: i64,
    /// Cap applied by the most recent allowed increment; NULL while unmetered
    pub limit_snapshot: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

/// Subscription record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub account_key: String,
    pub tier: String, // "free" or "pro"
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}
