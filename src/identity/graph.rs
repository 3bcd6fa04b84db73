/// Identity graph operations over accounts and platform links
use crate::db::models::{Account, PlatformLink};
use crate::error::{HubError, HubResult};
use crate::tokens::{TokenKind, TokenLedger};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use super::{validate_account_key, validate_platform_pair, AccountIdentifier, PlatformPair};

/// Identity graph service
#[derive(Clone)]
pub struct IdentityGraph {
    db: SqlitePool,
    ledger: TokenLedger,
}

impl IdentityGraph {
    pub fn new(db: SqlitePool, ledger: TokenLedger) -> Self {
        Self { db, ledger }
    }

    /// Idempotent create-or-get for a primary key. Calling this twice
    /// with the same key always lands on the same account.
    pub async fn ensure_account(&self, account_key: &str) -> HubResult<Account> {
        validate_account_key(account_key)?;

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (account_key, created_at)
            VALUES (?1, ?2)
            ON CONFLICT(account_key) DO NOTHING
            "#,
        )
        .bind(account_key)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            info!(account = %account_key, "Account created");
            crate::metrics::record_account_created();
        }

        self.get_account(account_key).await?.ok_or_else(|| {
            HubError::Internal(format!("Account {} vanished after ensure", account_key))
        })
    }

    /// Fetch an account by primary key
    pub async fn get_account(&self, account_key: &str) -> HubResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT account_key, created_at FROM accounts WHERE account_key = ?1",
        )
        .bind(account_key)
        .fetch_optional(&self.db)
        .await?;

        Ok(account)
    }

    /// Resolve an identifier to its canonical account. Never creates.
    pub async fn resolve(&self, identifier: &AccountIdentifier) -> HubResult<Option<Account>> {
        match identifier {
            AccountIdentifier::Key(key) => self.get_account(key).await,
            AccountIdentifier::Platform(pair) => {
                let account = sqlx::query_as::<_, Account>(
                    r#"
                    SELECT a.account_key, a.created_at
                    FROM accounts a
                    JOIN platform_links l ON l.account_key = a.account_key
                    WHERE l.provider = ?1 AND l.external_id = ?2
                    "#,
                )
                .bind(&pair.provider)
                .bind(&pair.external_id)
                .fetch_optional(&self.db)
                .await?;

                Ok(account)
            }
        }
    }

    /// Resolve, erroring on unknown identifiers
    pub async fn resolve_required(&self, identifier: &AccountIdentifier) -> HubResult<Account> {
        self.resolve(identifier)
            .await?
            .ok_or_else(|| HubError::NotFound("No account for identifier".to_string()))
    }

    /// Platform identities belonging to an account, newest first
    pub async fn links_for_account(&self, account_key: &str) -> HubResult<Vec<PlatformLink>> {
        let links = sqlx::query_as::<_, PlatformLink>(
            r#"
            SELECT provider, external_id, account_key, linked_at
            FROM platform_links
            WHERE account_key = ?1
            ORDER BY linked_at DESC
            "#,
        )
        .bind(account_key)
        .fetch_all(&self.db)
        .await?;

        Ok(links)
    }

    /// Fetch the link owning a platform pair, if any
    pub async fn get_link(&self, pair: &PlatformPair) -> HubResult<Option<PlatformLink>> {
        let link = sqlx::query_as::<_, PlatformLink>(
            r#"
            SELECT provider, external_id, account_key, linked_at
            FROM platform_links
            WHERE provider = ?1 AND external_id = ?2
            "#,
        )
        .bind(&pair.provider)
        .bind(&pair.external_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(link)
    }

    /// Attach a platform identity to an account by consuming a
    /// platform-link token issued for exactly that identity.
    ///
    /// Relinking a pair the account already owns is a no-op success and
    /// leaves the presented token untouched. A pair owned by another
    /// account is AlreadyLinked, also without consuming the token.
    pub async fn link_platform(
        &self,
        account_key: &str,
        pair: &PlatformPair,
        code: &str,
    ) -> HubResult<PlatformLink> {
        self.link_platform_at(account_key, pair, code, Utc::now()).await
    }

    pub(crate) async fn link_platform_at(
        &self,
        account_key: &str,
        pair: &PlatformPair,
        code: &str,
        now: DateTime<Utc>,
    ) -> HubResult<PlatformLink> {
        validate_platform_pair(pair)?;

        let account = self
            .get_account(account_key)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("No account {}", account_key)))?;

        if let Some(existing) = self.get_link(pair).await? {
            if existing.account_key == account.account_key {
                return Ok(existing);
            }
            return Err(HubError::AlreadyLinked);
        }

        // The token must be redeemable, a link token, and bound to the
        // presented pair, all checked before anything is consumed
        let token = self
            .ledger
            .validate_at(code, now)
            .await
            .map_err(token_invalid)?;

        if TokenKind::parse(&token.kind) != Some(TokenKind::PlatformLink) {
            return Err(token_invalid(HubError::Validation(
                "Not a platform link token".to_string(),
            )));
        }

        let bound_pair = match (&token.link_provider, &token.link_external_id) {
            (Some(provider), Some(external_id)) => PlatformPair {
                provider: provider.clone(),
                external_id: external_id.clone(),
            },
            _ => {
                return Err(HubError::Internal(format!(
                    "Link token {} has no platform identity",
                    token.token_id
                )));
            }
        };
        if bound_pair != *pair {
            return Err(token_invalid(HubError::Validation(
                "Token authorizes a different platform identity".to_string(),
            )));
        }

        // Claim the token; the single-use gate settles linker races
        self.ledger
            .redeem_at(code, account_key, now)
            .await
            .map_err(token_invalid)?;

        let result = sqlx::query(
            r#"
            INSERT INTO platform_links (provider, external_id, account_key, linked_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&pair.provider)
        .bind(&pair.external_id)
        .bind(account_key)
        .bind(now)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {
                info!(
                    account = %account_key,
                    provider = %pair.provider,
                    "Platform identity linked"
                );
                Ok(PlatformLink {
                    provider: pair.provider.clone(),
                    external_id: pair.external_id.clone(),
                    account_key: account_key.to_string(),
                    linked_at: now,
                })
            }
            Err(err) if is_unique_violation(&err) => {
                // Raced another linker to the pair; the token is spent
                // but the pair is never reassigned
                match self.get_link(pair).await? {
                    Some(link) if link.account_key == account.account_key => Ok(link),
                    _ => Err(HubError::AlreadyLinked),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Wrap token-side rejections for the link flow, leaving server faults
/// untouched
fn token_invalid(err: HubError) -> HubError {
    if matches!(
        err,
        HubError::Database(_) | HubError::Internal(_) | HubError::Io(_)
    ) {
        return err;
    }
    HubError::TokenInvalid(Box::new(err))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InviteConfig;
    use crate::db::testing::memory_pool;
    use crate::tokens::NewToken;
    use chrono::Duration;

    async fn test_graph() -> IdentityGraph {
        let pool = memory_pool().await;
        let ledger = TokenLedger::new(
            pool.clone(),
            InviteConfig {
                startup_ttl_secs: 2_592_000,
                team_ttl_secs: 604_800,
                link_ttl_secs: 3_600,
            },
        );
        IdentityGraph::new(pool, ledger)
    }

    fn telegram_pair(external_id: &str) -> PlatformPair {
        PlatformPair {
            provider: "telegram".to_string(),
            external_id: external_id.to_string(),
        }
    }

    fn link_token_for(pair: &PlatformPair) -> NewToken {
        NewToken {
            kind: TokenKind::PlatformLink,
            issuer_id: "admin:program".to_string(),
            subject_hint: "link grant".to_string(),
            email_hint: None,
            ttl: None,
            link_target: Some(pair.clone()),
        }
    }

    #[tokio::test]
    async fn ensure_account_is_idempotent() {
        let graph = test_graph().await;

        let first = graph.ensure_account("did:key:founder01").await.unwrap();
        let second = graph.ensure_account("did:key:founder01").await.unwrap();

        assert_eq!(first.account_key, second.account_key);
        assert_eq!(first.created_at, second.created_at);

        assert!(matches!(
            graph.ensure_account("nope").await,
            Err(HubError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn resolve_finds_by_key_and_by_pair() {
        let graph = test_graph().await;
        graph.ensure_account("did:key:founder01").await.unwrap();

        let by_key = graph
            .resolve(&AccountIdentifier::Key("did:key:founder01".to_string()))
            .await
            .unwrap();
        assert!(by_key.is_some());

        // Unknown handles resolve to nothing, and never create
        let unknown = graph
            .resolve(&AccountIdentifier::Key("did:key:stranger".to_string()))
            .await
            .unwrap();
        assert!(unknown.is_none());
        assert!(matches!(
            graph
                .resolve_required(&AccountIdentifier::Platform(telegram_pair("404")))
                .await,
            Err(HubError::NotFound(_))
        ));
        assert!(graph.get_account("did:key:stranger").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn link_platform_consumes_token_and_resolves() {
        let graph = test_graph().await;
        graph.ensure_account("did:key:founder01").await.unwrap();

        let pair = telegram_pair("111222333");
        let token = graph.ledger.issue(link_token_for(&pair)).await.unwrap();

        let link = graph
            .link_platform("did:key:founder01", &pair, &token.code)
            .await
            .unwrap();
        assert_eq!(link.account_key, "did:key:founder01");

        let resolved = graph
            .resolve_required(&AccountIdentifier::Platform(pair.clone()))
            .await
            .unwrap();
        assert_eq!(resolved.account_key, "did:key:founder01");

        let spent = graph.ledger.get_by_code(&token.code).await.unwrap().unwrap();
        assert_eq!(spent.status, "used");
        assert_eq!(spent.bound_account.as_deref(), Some("did:key:founder01"));

        let links = graph.links_for_account("did:key:founder01").await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].external_id, "111222333");
    }

    #[tokio::test]
    async fn relink_same_account_keeps_the_token() {
        let graph = test_graph().await;
        graph.ensure_account("did:key:founder01").await.unwrap();

        let pair = telegram_pair("111222333");
        let first = graph.ledger.issue(link_token_for(&pair)).await.unwrap();
        graph
            .link_platform("did:key:founder01", &pair, &first.code)
            .await
            .unwrap();

        let second = graph.ledger.issue(link_token_for(&pair)).await.unwrap();
        let relink = graph
            .link_platform("did:key:founder01", &pair, &second.code)
            .await
            .unwrap();
        assert_eq!(relink.account_key, "did:key:founder01");

        // No-op path never burned the second token
        let unspent = graph.ledger.get_by_code(&second.code).await.unwrap().unwrap();
        assert_eq!(unspent.status, "pending");
    }

    #[tokio::test]
    async fn pair_belongs_to_one_account_only() {
        let graph = test_graph().await;
        graph.ensure_account("did:key:founder01").await.unwrap();
        graph.ensure_account("did:key:rival002").await.unwrap();

        let pair = telegram_pair("111222333");
        let first = graph.ledger.issue(link_token_for(&pair)).await.unwrap();
        graph
            .link_platform("did:key:founder01", &pair, &first.code)
            .await
            .unwrap();

        let second = graph.ledger.issue(link_token_for(&pair)).await.unwrap();
        assert!(matches!(
            graph
                .link_platform("did:key:rival002", &pair, &second.code)
                .await,
            Err(HubError::AlreadyLinked)
        ));

        // Rejection without consuming the rival's token
        let unspent = graph.ledger.get_by_code(&second.code).await.unwrap().unwrap();
        assert_eq!(unspent.status, "pending");

        // And the pair still resolves to the original owner
        let owner = graph
            .resolve_required(&AccountIdentifier::Platform(pair))
            .await
            .unwrap();
        assert_eq!(owner.account_key, "did:key:founder01");
    }

    #[tokio::test]
    async fn mismatched_or_wrong_kind_tokens_are_rejected() {
        let graph = test_graph().await;
        graph.ensure_account("did:key:founder01").await.unwrap();

        // Token bound to a different platform identity
        let issued_for = telegram_pair("111222333");
        let presented = telegram_pair("999888777");
        let token = graph.ledger.issue(link_token_for(&issued_for)).await.unwrap();
        assert!(matches!(
            graph
                .link_platform("did:key:founder01", &presented, &token.code)
                .await,
            Err(HubError::TokenInvalid(_))
        ));
        let untouched = graph.ledger.get_by_code(&token.code).await.unwrap().unwrap();
        assert_eq!(untouched.status, "pending");

        // An invite code is not a link grant
        let invite = graph
            .ledger
            .issue(NewToken {
                kind: TokenKind::StartupInvite,
                issuer_id: "admin:program".to_string(),
                subject_hint: "Rocket Co".to_string(),
                email_hint: None,
                ttl: None,
                link_target: None,
            })
            .await
            .unwrap();
        assert!(matches!(
            graph
                .link_platform("did:key:founder01", &presented, &invite.code)
                .await,
            Err(HubError::TokenInvalid(_))
        ));
    }

    #[tokio::test]
    async fn expired_link_token_reports_its_cause() {
        let graph = test_graph().await;
        graph.ensure_account("did:key:founder01").await.unwrap();

        let pair = telegram_pair("111222333");
        let token = graph.ledger.issue(link_token_for(&pair)).await.unwrap();
        let after_expiry = token.expires_at + Duration::seconds(1);

        let err = graph
            .link_platform_at("did:key:founder01", &pair, &token.code, after_expiry)
            .await
            .unwrap_err();
        match err {
            HubError::TokenInvalid(inner) => assert!(matches!(*inner, HubError::Expired)),
            other => panic!("expected TokenInvalid, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn linking_needs_an_existing_account() {
        let graph = test_graph().await;

        let pair = telegram_pair("111222333");
        let token = graph.ledger.issue(link_token_for(&pair)).await.unwrap();

        assert!(matches!(
            graph
                .link_platform("did:key:stranger", &pair, &token.code)
                .await,
            Err(HubError::NotFound(_))
        ));
    }
}
