/// Single-use token model: startup/team invite codes and platform-link grants
///
/// A token moves Pending -> Used | Revoked | Expired and never leaves a
/// terminal state. Expiry is derived from the clock on every read; the
/// stored `expired` status is only a cache written by the sweep job.

pub mod ledger;

pub use ledger::TokenLedger;

use crate::config::InviteConfig;
use crate::identity::PlatformPair;
use chrono::Duration;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Token categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    StartupInvite,
    TeamInvite,
    PlatformLink,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::StartupInvite => "startup_invite",
            TokenKind::TeamInvite => "team_invite",
            TokenKind::PlatformLink => "platform_link",
        }
    }

    pub fn parse(s: &str) -> Option<TokenKind> {
        match s {
            "startup_invite" => Some(TokenKind::StartupInvite),
            "team_invite" => Some(TokenKind::TeamInvite),
            "platform_link" => Some(TokenKind::PlatformLink),
            _ => None,
        }
    }

    /// Short prefix baked into generated codes
    pub fn code_prefix(&self) -> &'static str {
        match self {
            TokenKind::StartupInvite => "si",
            TokenKind::TeamInvite => "ti",
            TokenKind::PlatformLink => "pl",
        }
    }

    /// Recover the kind from a code's prefix
    pub fn from_code(code: &str) -> Option<TokenKind> {
        match code.split('-').next() {
            Some("si") => Some(TokenKind::StartupInvite),
            Some("ti") => Some(TokenKind::TeamInvite),
            Some("pl") => Some(TokenKind::PlatformLink),
            _ => None,
        }
    }

    /// Configured default lifetime for this kind
    pub fn default_ttl(&self, invites: &InviteConfig) -> Duration {
        let secs = match self {
            TokenKind::StartupInvite => invites.startup_ttl_secs,
            TokenKind::TeamInvite => invites.team_ttl_secs,
            TokenKind::PlatformLink => invites.link_ttl_secs,
        };
        Duration::seconds(secs)
    }
}

/// Token lifecycle states as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Pending,
    Used,
    Revoked,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Pending => "pending",
            TokenStatus::Used => "used",
            TokenStatus::Revoked => "revoked",
            TokenStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<TokenStatus> {
        match s {
            "pending" => Some(TokenStatus::Pending),
            "used" => Some(TokenStatus::Used),
            "revoked" => Some(TokenStatus::Revoked),
            "expired" => Some(TokenStatus::Expired),
            _ => None,
        }
    }
}

/// Parameters for issuing a token
#[derive(Debug, Clone)]
pub struct NewToken {
    pub kind: TokenKind,
    pub issuer_id: String,
    pub subject_hint: String,
    pub email_hint: Option<String>,
    /// Overrides the configured default lifetime when set
    pub ttl: Option<Duration>,
    /// Platform identity a link token authorizes; required for that kind
    pub link_target: Option<PlatformPair>,
}

/// Generate a token code: kind prefix plus 16 random alphanumerics
pub fn generate_code(kind: TokenKind) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    format!("{}-{}", kind.code_prefix(), suffix.to_lowercase())
}
