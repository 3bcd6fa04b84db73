/// Subscription tiers
///
/// Two tiers, Free and Pro. Pro is time-boxed by expires_at and lapses
/// lazily: reads evaluate the record against the clock, nothing ever
/// downgrades it in the background.

pub mod registry;

pub use registry::SubscriptionRegistry;

use serde::{Deserialize, Serialize};

/// Account tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }

    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            _ => None,
        }
    }
}
