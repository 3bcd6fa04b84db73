/// Token ledger: issuing and settling single-use tokens
use crate::config::InviteConfig;
use crate::db::models::TokenRecord;
use crate::error::{HubError, HubResult};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::{generate_code, NewToken, TokenKind, TokenStatus};

/// Code generation attempts before giving up with DuplicateCode
const MAX_CODE_ATTEMPTS: u32 = 8;

const TOKEN_COLUMNS: &str = "token_id, kind, code, issuer_id, subject_hint, email_hint, \
     link_provider, link_external_id, status, created_at, expires_at, used_at, bound_account";

/// Token ledger service
///
/// Every operation takes exactly one clock reading and classifies the
/// token against it, so a token expired for one call can never look
/// pending later in the same call. State transitions go through a
/// conditional UPDATE on the stored status; `rows_affected` decides
/// the winner when calls race.
#[derive(Clone)]
pub struct TokenLedger {
    db: SqlitePool,
    invites: InviteConfig,
}

impl TokenLedger {
    pub fn new(db: SqlitePool, invites: InviteConfig) -> Self {
        Self { db, invites }
    }

    /// Issue a fresh pending token. Retries code generation on the
    /// off-chance of a collision with an existing code.
    pub async fn issue(&self, new: NewToken) -> HubResult<TokenRecord> {
        self.issue_at(new, Utc::now()).await
    }

    pub(crate) async fn issue_at(&self, new: NewToken, now: DateTime<Utc>) -> HubResult<TokenRecord> {
        if new.subject_hint.trim().is_empty() {
            return Err(HubError::Validation(
                "Subject hint cannot be empty".to_string(),
            ));
        }

        if let Some(ref email) = new.email_hint {
            if !email.contains('@') || email.len() > 254 {
                return Err(HubError::Validation(format!(
                    "Invalid email hint: {}",
                    email
                )));
            }
        }

        match (new.kind, &new.link_target) {
            (TokenKind::PlatformLink, None) => {
                return Err(HubError::Validation(
                    "Platform link tokens must name a provider identity".to_string(),
                ));
            }
            (TokenKind::PlatformLink, Some(pair)) => {
                crate::identity::validate_platform_pair(pair)?;
            }
            (_, Some(_)) => {
                return Err(HubError::Validation(
                    "Only platform link tokens carry a provider identity".to_string(),
                ));
            }
            (_, None) => {}
        }

        let ttl = new.ttl.unwrap_or_else(|| new.kind.default_ttl(&self.invites));
        if ttl <= Duration::zero() {
            return Err(HubError::Validation(
                "Token lifetime must be positive".to_string(),
            ));
        }
        let expires_at = now + ttl;

        let (link_provider, link_external_id) = match &new.link_target {
            Some(pair) => (Some(pair.provider.clone()), Some(pair.external_id.clone())),
            None => (None, None),
        };

        for attempt in 0..MAX_CODE_ATTEMPTS {
            let token_id = Uuid::new_v4().to_string();
            let code = generate_code(new.kind);

            let result = sqlx::query(
                r#"
                INSERT INTO tokens (token_id, kind, code, issuer_id, subject_hint, email_hint,
                                    link_provider, link_external_id, status, created_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10)
                "#,
            )
            .bind(&token_id)
            .bind(new.kind.as_str())
            .bind(&code)
            .bind(&new.issuer_id)
            .bind(&new.subject_hint)
            .bind(&new.email_hint)
            .bind(&link_provider)
            .bind(&link_external_id)
            .bind(now)
            .bind(expires_at)
            .execute(&self.db)
            .await;

            match result {
                Ok(_) => {
                    info!(
                        code = %code,
                        kind = %new.kind.as_str(),
                        issuer = %new.issuer_id,
                        "Token issued"
                    );
                    return self
                        .get_by_id(&token_id)
                        .await?
                        .ok_or_else(|| {
                            HubError::Internal(format!("Token {} vanished after insert", token_id))
                        });
                }
                Err(err) if is_unique_violation(&err) => {
                    debug!(attempt, "Token code collision, regenerating");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(HubError::DuplicateCode)
    }

    /// Side-effect-free check: what would redeeming this code do?
    pub async fn validate(&self, code: &str) -> HubResult<TokenRecord> {
        self.validate_at(code, Utc::now()).await
    }

    pub(crate) async fn validate_at(&self, code: &str, now: DateTime<Utc>) -> HubResult<TokenRecord> {
        let token = self
            .get_by_code(code)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("No token with code {}", code)))?;

        self.classify(&token, now)?;
        Ok(token)
    }

    /// Atomically claim a pending token for an account, binding it
    /// permanently. At most one caller ever succeeds per token.
    ///
    /// The caller guarantees the redeeming account row exists.
    pub async fn redeem(&self, code: &str, account_key: &str) -> HubResult<TokenRecord> {
        self.redeem_at(code, account_key, Utc::now()).await
    }

    pub(crate) async fn redeem_at(
        &self,
        code: &str,
        account_key: &str,
        now: DateTime<Utc>,
    ) -> HubResult<TokenRecord> {
        let token = self
            .get_by_code(code)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("No token with code {}", code)))?;

        self.classify(&token, now)?;

        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET status = 'used', used_at = ?1, bound_account = ?2
            WHERE token_id = ?3 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(account_key)
        .bind(&token.token_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            // Lost the claim; report the state that beat us
            let settled = self.get_by_id(&token.token_id).await?.ok_or_else(|| {
                HubError::Internal(format!("Token {} vanished during redeem", token.token_id))
            })?;
            self.classify(&settled, now)?;
            return Err(HubError::Internal(format!(
                "Token {} claim failed while still pending",
                token.token_id
            )));
        }

        info!(code = %token.code, account = %account_key, "Token redeemed");

        self.get_by_id(&token.token_id).await?.ok_or_else(|| {
            HubError::Internal(format!("Token {} vanished after redeem", token.token_id))
        })
    }

    /// Revoke a pending token. Only the issuer may revoke; any
    /// non-pending state, including lazy expiry, is InvalidState.
    pub async fn revoke(&self, token_id: &str, caller: &str) -> HubResult<TokenRecord> {
        self.revoke_at(token_id, caller, Utc::now()).await
    }

    pub(crate) async fn revoke_at(
        &self,
        token_id: &str,
        caller: &str,
        now: DateTime<Utc>,
    ) -> HubResult<TokenRecord> {
        let token = self
            .get_by_id(token_id)
            .await?
            .ok_or_else(|| HubError::NotFound(format!("No token {}", token_id)))?;

        if token.issuer_id != caller {
            return Err(HubError::Authorization(
                "Only the issuing account can revoke a token".to_string(),
            ));
        }

        self.classify(&token, now).map_err(settled_to_invalid_state)?;

        let result = sqlx::query(
            "UPDATE tokens SET status = 'revoked' WHERE token_id = ?1 AND status = 'pending'",
        )
        .bind(&token.token_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            let settled = self.get_by_id(&token.token_id).await?.ok_or_else(|| {
                HubError::Internal(format!("Token {} vanished during revoke", token.token_id))
            })?;
            self.classify(&settled, now).map_err(settled_to_invalid_state)?;
            return Err(HubError::Internal(format!(
                "Token {} revoke failed while still pending",
                token.token_id
            )));
        }

        info!(code = %token.code, issuer = %caller, "Token revoked");

        self.get_by_id(&token.token_id).await?.ok_or_else(|| {
            HubError::Internal(format!("Token {} vanished after revoke", token.token_id))
        })
    }

    /// Fetch a token by its public code
    pub async fn get_by_code(&self, code: &str) -> HubResult<Option<TokenRecord>> {
        let token = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE code = ?1",
            TOKEN_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        Ok(token)
    }

    /// Fetch a token by id
    pub async fn get_by_id(&self, token_id: &str) -> HubResult<Option<TokenRecord>> {
        let token = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE token_id = ?1",
            TOKEN_COLUMNS
        ))
        .bind(token_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(token)
    }

    /// Tokens still redeemable, newest first, optionally for one issuer.
    /// Rows the sweep has not caught up with are filtered here.
    pub async fn list_active(&self, issuer: Option<&str>) -> HubResult<Vec<TokenRecord>> {
        self.list_active_at(issuer, Utc::now()).await
    }

    pub(crate) async fn list_active_at(
        &self,
        issuer: Option<&str>,
        now: DateTime<Utc>,
    ) -> HubResult<Vec<TokenRecord>> {
        let rows = match issuer {
            Some(issuer_id) => {
                sqlx::query_as::<_, TokenRecord>(&format!(
                    "SELECT {} FROM tokens WHERE status = 'pending' AND issuer_id = ?1 \
                     ORDER BY created_at DESC",
                    TOKEN_COLUMNS
                ))
                .bind(issuer_id)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, TokenRecord>(&format!(
                    "SELECT {} FROM tokens WHERE status = 'pending' ORDER BY created_at DESC",
                    TOKEN_COLUMNS
                ))
                .fetch_all(&self.db)
                .await?
            }
        };

        Ok(rows.into_iter().filter(|t| now < t.expires_at).collect())
    }

    /// Flip stale pending rows to expired, one compare-and-swap per row
    /// so an in-flight redeem can never be clobbered. Returns the flip
    /// count. Purely a cache for listings; reads never trust it.
    pub async fn sweep_expired(&self) -> HubResult<u64> {
        self.sweep_expired_at(Utc::now()).await
    }

    pub(crate) async fn sweep_expired_at(&self, now: DateTime<Utc>) -> HubResult<u64> {
        let rows = sqlx::query_as::<_, TokenRecord>(&format!(
            "SELECT {} FROM tokens WHERE status = 'pending'",
            TOKEN_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        let mut swept = 0u64;
        for token in rows.iter().filter(|t| t.expires_at <= now) {
            let result = sqlx::query(
                "UPDATE tokens SET status = 'expired' WHERE token_id = ?1 AND status = 'pending'",
            )
            .bind(&token.token_id)
            .execute(&self.db)
            .await?;
            swept += result.rows_affected();
        }

        if swept > 0 {
            debug!(swept, "Expired token sweep finished");
        }

        Ok(swept)
    }

    /// Evaluate a token against `now`. Ok means redeemable right now.
    fn classify(&self, token: &TokenRecord, now: DateTime<Utc>) -> HubResult<()> {
        match TokenStatus::parse(&token.status) {
            Some(TokenStatus::Used) => {
                if token.bound_account.is_none() {
                    // A used token with no bound account breaks the
                    // ledger's own bookkeeping, not the caller's input
                    return Err(HubError::Internal(format!(
                        "Used token {} has no bound account",
                        token.token_id
                    )));
                }
                Err(HubError::AlreadyUsed)
            }
            Some(TokenStatus::Revoked) => Err(HubError::Revoked),
            Some(TokenStatus::Expired) => Err(HubError::Expired),
            Some(TokenStatus::Pending) => {
                // Valid strictly before expires_at
                if now < token.expires_at {
                    Ok(())
                } else {
                    Err(HubError::Expired)
                }
            }
            None => Err(HubError::Internal(format!(
                "Token {} has unknown status {}",
                token.token_id, token.status
            ))),
        }
    }
}

/// Revoke reports settled tokens as InvalidState rather than the
/// redeem-side kinds
fn settled_to_invalid_state(err: HubError) -> HubError {
    match err {
        HubError::AlreadyUsed => HubError::InvalidState("Token already used".to_string()),
        HubError::Revoked => HubError::InvalidState("Token already revoked".to_string()),
        HubError::Expired => HubError::InvalidState("Token already expired".to_string()),
        other => other,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{memory_pool, seed_account};
    use crate::identity::PlatformPair;

    fn invite_config() -> InviteConfig {
        InviteConfig {
            startup_ttl_secs: 2_592_000,
            team_ttl_secs: 604_800,
            link_ttl_secs: 3_600,
        }
    }

    async fn test_ledger() -> (TokenLedger, SqlitePool) {
        let pool = memory_pool().await;
        (TokenLedger::new(pool.clone(), invite_config()), pool)
    }

    fn startup_invite(issuer: &str, subject: &str) -> NewToken {
        NewToken {
            kind: TokenKind::StartupInvite,
            issuer_id: issuer.to_string(),
            subject_hint: subject.to_string(),
            email_hint: None,
            ttl: None,
            link_target: None,
        }
    }

    #[tokio::test]
    async fn issue_validate_redeem_binds_account() {
        let (ledger, pool) = test_ledger().await;
        seed_account(&pool, "did:key:founder").await;

        let token = ledger
            .issue(startup_invite("admin:program", "Rocket Co"))
            .await
            .unwrap();
        assert_eq!(token.status, "pending");
        assert!(token.code.starts_with("si-"));

        // Preview leaves the token untouched
        let seen = ledger.validate(&token.code).await.unwrap();
        assert_eq!(seen.status, "pending");

        let redeemed = ledger.redeem(&token.code, "did:key:founder").await.unwrap();
        assert_eq!(redeemed.status, "used");
        assert_eq!(redeemed.bound_account.as_deref(), Some("did:key:founder"));
        assert!(redeemed.used_at.is_some());

        // Settled now, for everyone
        assert!(matches!(
            ledger.validate(&token.code).await,
            Err(HubError::AlreadyUsed)
        ));
        seed_account(&pool, "did:key:other").await;
        assert!(matches!(
            ledger.redeem(&token.code, "did:key:other").await,
            Err(HubError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let (ledger, _pool) = test_ledger().await;

        assert!(matches!(
            ledger.validate("si-nosuchcode0000000").await,
            Err(HubError::NotFound(_))
        ));
        assert!(matches!(
            ledger.redeem("si-nosuchcode0000000", "did:key:a").await,
            Err(HubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expiry_is_derived_and_monotonic() {
        let (ledger, pool) = test_ledger().await;
        seed_account(&pool, "did:key:late").await;

        let issued_at = Utc::now();
        let token = ledger
            .issue_at(startup_invite("admin:program", "Slowpoke Inc"), issued_at)
            .await
            .unwrap();
        let expires_at = token.expires_at;

        // Valid strictly before the deadline
        ledger
            .validate_at(&token.code, expires_at - Duration::milliseconds(1))
            .await
            .unwrap();

        // now == expires_at is already expired
        assert!(matches!(
            ledger.validate_at(&token.code, expires_at).await,
            Err(HubError::Expired)
        ));
        assert!(matches!(
            ledger.redeem_at(&token.code, "did:key:late", expires_at).await,
            Err(HubError::Expired)
        ));
        assert!(matches!(
            ledger
                .redeem_at(&token.code, "did:key:late", expires_at + Duration::days(2))
                .await,
            Err(HubError::Expired)
        ));

        // The stored row still says pending; the clock made it expired
        let stored = ledger.get_by_code(&token.code).await.unwrap().unwrap();
        assert_eq!(stored.status, "pending");
    }

    #[tokio::test]
    async fn revoke_is_issuer_only_and_pending_only() {
        let (ledger, pool) = test_ledger().await;
        seed_account(&pool, "did:key:member").await;

        let token = ledger
            .issue(startup_invite("admin:program", "Revocable Ltd"))
            .await
            .unwrap();

        assert!(matches!(
            ledger.revoke(&token.token_id, "admin:intruder").await,
            Err(HubError::Authorization(_))
        ));

        let revoked = ledger.revoke(&token.token_id, "admin:program").await.unwrap();
        assert_eq!(revoked.status, "revoked");

        assert!(matches!(
            ledger.redeem(&token.code, "did:key:member").await,
            Err(HubError::Revoked)
        ));

        // Revoking again is a state error, not a success
        assert!(matches!(
            ledger.revoke(&token.token_id, "admin:program").await,
            Err(HubError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn revoke_after_use_or_lazy_expiry_is_invalid_state() {
        let (ledger, pool) = test_ledger().await;
        seed_account(&pool, "did:key:member").await;

        let used = ledger
            .issue(startup_invite("admin:program", "Used Co"))
            .await
            .unwrap();
        ledger.redeem(&used.code, "did:key:member").await.unwrap();
        assert!(matches!(
            ledger.revoke(&used.token_id, "admin:program").await,
            Err(HubError::InvalidState(_))
        ));

        // Lazily expired: stored status still pending
        let stale = ledger
            .issue(startup_invite("admin:program", "Stale Co"))
            .await
            .unwrap();
        let after_expiry = stale.expires_at + Duration::seconds(1);
        assert!(matches!(
            ledger
                .revoke_at(&stale.token_id, "admin:program", after_expiry)
                .await,
            Err(HubError::InvalidState(_))
        ));
        let stored = ledger.get_by_id(&stale.token_id).await.unwrap().unwrap();
        assert_eq!(stored.status, "pending");
    }

    #[tokio::test]
    async fn concurrent_redeems_have_one_winner() {
        let (ledger, pool) = test_ledger().await;

        let token = ledger
            .issue(startup_invite("admin:program", "Contended Co"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let account = format!("did:key:racer{}", i);
            seed_account(&pool, &account).await;
            let ledger = ledger.clone();
            let code = token.code.clone();
            handles.push(tokio::spawn(async move {
                ledger.redeem(&code, &account).await
            }));
        }

        let mut winners = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(HubError::AlreadyUsed) => already_used += 1,
                Err(other) => panic!("unexpected redeem outcome: {:?}", other),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(already_used, 7);

        // Binding matches exactly one racing account and never changes
        let settled = ledger.get_by_code(&token.code).await.unwrap().unwrap();
        let bound = settled.bound_account.unwrap();
        assert!(bound.starts_with("did:key:racer"));
    }

    #[tokio::test]
    async fn seven_day_invite_walkthrough() {
        let (ledger, pool) = test_ledger().await;
        seed_account(&pool, "did:key:foundr-p").await;
        seed_account(&pool, "did:key:foundr-q").await;

        let now = Utc::now();
        let mut invite = startup_invite("admin:program", "Walkthrough Co");
        invite.ttl = Some(Duration::days(7));
        let first = ledger.issue_at(invite.clone(), now).await.unwrap();
        let second = ledger.issue_at(invite, now).await.unwrap();

        // Fresh code previews as redeemable
        let seen = ledger.validate_at(&first.code, now).await.unwrap();
        assert_eq!(seen.status, "pending");

        // First claim wins; the code is spent for everyone after
        ledger
            .redeem_at(&first.code, "did:key:foundr-p", now)
            .await
            .unwrap();
        assert!(matches!(
            ledger.redeem_at(&first.code, "did:key:foundr-q", now).await,
            Err(HubError::AlreadyUsed)
        ));

        // Eight days on, the untouched sibling invite has quietly expired
        let later = now + Duration::days(8);
        assert!(matches!(
            ledger.validate_at(&second.code, later).await,
            Err(HubError::Expired)
        ));
    }

    #[tokio::test]
    async fn issue_rejects_malformed_requests() {
        let (ledger, _pool) = test_ledger().await;

        // Link kind without a platform pair
        let mut bad = startup_invite("admin:program", "Linkless");
        bad.kind = TokenKind::PlatformLink;
        assert!(matches!(
            ledger.issue(bad).await,
            Err(HubError::Validation(_))
        ));

        // Invite kind with a platform pair
        let mut bad = startup_invite("admin:program", "Overloaded");
        bad.link_target = Some(PlatformPair {
            provider: "telegram".to_string(),
            external_id: "12345".to_string(),
        });
        assert!(matches!(
            ledger.issue(bad).await,
            Err(HubError::Validation(_))
        ));

        // Zero lifetime
        let mut bad = startup_invite("admin:program", "Ephemeral");
        bad.ttl = Some(Duration::zero());
        assert!(matches!(
            ledger.issue(bad).await,
            Err(HubError::Validation(_))
        ));

        // Blank subject
        let bad = startup_invite("admin:program", "   ");
        assert!(matches!(
            ledger.issue(bad).await,
            Err(HubError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn active_listing_skips_settled_and_stale() {
        let (ledger, pool) = test_ledger().await;
        seed_account(&pool, "did:key:member").await;
        let now = Utc::now();

        let live = ledger
            .issue_at(startup_invite("admin:a", "Live Co"), now)
            .await
            .unwrap();

        let mut short = startup_invite("admin:a", "Short Co");
        short.ttl = Some(Duration::hours(1));
        let stale = ledger.issue_at(short, now).await.unwrap();

        let spent = ledger
            .issue_at(startup_invite("admin:b", "Spent Co"), now)
            .await
            .unwrap();
        ledger.redeem(&spent.code, "did:key:member").await.unwrap();

        let later = now + Duration::hours(2);
        let all = ledger.list_active_at(None, later).await.unwrap();
        let codes: Vec<_> = all.iter().map(|t| t.code.as_str()).collect();
        assert!(codes.contains(&live.code.as_str()));
        assert!(!codes.contains(&stale.code.as_str()));
        assert!(!codes.contains(&spent.code.as_str()));

        let mine = ledger.list_active_at(Some("admin:a"), later).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].code, live.code);
    }

    #[tokio::test]
    async fn sweep_flips_only_stale_pending_rows() {
        let (ledger, pool) = test_ledger().await;
        seed_account(&pool, "did:key:member").await;
        let now = Utc::now();

        let mut short = startup_invite("admin:a", "Stale Co");
        short.ttl = Some(Duration::hours(1));
        let stale = ledger.issue_at(short, now).await.unwrap();

        let mut long = startup_invite("admin:a", "Fresh Co");
        long.ttl = Some(Duration::hours(6));
        let fresh = ledger.issue_at(long, now).await.unwrap();

        let spent = ledger
            .issue_at(startup_invite("admin:a", "Spent Co"), now)
            .await
            .unwrap();
        ledger.redeem(&spent.code, "did:key:member").await.unwrap();

        let swept = ledger.sweep_expired_at(now + Duration::hours(2)).await.unwrap();
        assert_eq!(swept, 1);

        let stale_row = ledger.get_by_id(&stale.token_id).await.unwrap().unwrap();
        assert_eq!(stale_row.status, "expired");
        let fresh_row = ledger.get_by_id(&fresh.token_id).await.unwrap().unwrap();
        assert_eq!(fresh_row.status, "pending");
        let spent_row = ledger.get_by_id(&spent.token_id).await.unwrap().unwrap();
        assert_eq!(spent_row.status, "used");

        // Swept rows classify the same as lazily expired ones
        assert!(matches!(
            ledger.validate(&stale.code).await,
            Err(HubError::Expired)
        ));
    }
}
