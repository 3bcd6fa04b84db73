/// Identity graph: canonical accounts and their linked platform identities
///
/// An account is keyed by the primary cryptographic key its owner
/// presented at first contact. Platform identities (telegram, discord,
/// matrix, ...) hang off the account and each belongs to at most one.

pub mod graph;

pub use graph::IdentityGraph;

use crate::error::{HubError, HubResult};
use serde::{Deserialize, Serialize};

/// A platform identity: which provider, and who there
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformPair {
    pub provider: String,
    pub external_id: String,
}

/// Either handle usable to look up a canonical account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountIdentifier {
    Key(String),
    Platform(PlatformPair),
}

/// Validate an account primary key. Keys are opaque but must look like
/// one: 8-128 chars of alphanumerics plus `: . _ -`, which covers
/// did:key, did:web, 0x-hex and base58 forms.
pub fn validate_account_key(key: &str) -> HubResult<()> {
    let len_ok = (8..=128).contains(&key.len());
    let chars_ok = key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '.' | '_' | '-'));

    if !len_ok || !chars_ok {
        return Err(HubError::Validation(format!(
            "Invalid account key: {}",
            key
        )));
    }

    Ok(())
}

/// Validate a provider slug: 2-32 chars of lowercase alphanumerics and
/// underscores. The provider set is open; only the shape is fixed.
pub fn validate_provider(provider: &str) -> HubResult<()> {
    let len_ok = (2..=32).contains(&provider.len());
    let chars_ok = provider
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !len_ok || !chars_ok {
        return Err(HubError::Validation(format!(
            "Invalid provider: {}",
            provider
        )));
    }

    Ok(())
}

/// Validate a provider-side user id: 1-128 chars, no whitespace or
/// control characters.
pub fn validate_external_id(external_id: &str) -> HubResult<()> {
    let len_ok = (1..=128).contains(&external_id.len());
    let chars_ok = external_id
        .chars()
        .all(|c| !c.is_whitespace() && !c.is_control());

    if !len_ok || !chars_ok {
        return Err(HubError::Validation(
            "Invalid platform user id".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_platform_pair(pair: &PlatformPair) -> HubResult<()> {
    validate_provider(&pair.provider)?;
    validate_external_id(&pair.external_id)
}
