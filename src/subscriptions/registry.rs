/// Subscription registry: tier records and read-time lapse
use crate::db::models::Subscription;
use crate::error::{HubError, HubResult};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use super::Tier;

/// Subscription registry service
#[derive(Clone)]
pub struct SubscriptionRegistry {
    db: SqlitePool,
}

impl SubscriptionRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Upsert an account's tier. Pro upserts reactivate the record and
    /// stamp renewed_at; setting Free clears expires_at.
    pub async fn set_tier(
        &self,
        account_key: &str,
        tier: Tier,
        expires_at: Option<DateTime<Utc>>,
    ) -> HubResult<Subscription> {
        let exists = sqlx::query("SELECT 1 FROM accounts WHERE account_key = ?1")
            .bind(account_key)
            .fetch_optional(&self.db)
            .await?;
        if exists.is_none() {
            return Err(HubError::NotFound(format!("No account {}", account_key)));
        }

        let now = Utc::now();
        let expires_at = match tier {
            Tier::Free => None,
            Tier::Pro => expires_at,
        };

        sqlx::query(
            r#"
            INSERT INTO subscriptions (account_key, tier, is_active, started_at, renewed_at, expires_at)
            VALUES (?1, ?2, 1, ?3, NULL, ?4)
            ON CONFLICT(account_key) DO UPDATE SET
                tier = excluded.tier,
                is_active = 1,
                renewed_at = CASE WHEN excluded.tier = 'pro' THEN ?5 ELSE renewed_at END,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(account_key)
        .bind(tier.as_str())
        .bind(now)
        .bind(expires_at)
        .bind(now)
        .execute(&self.db)
        .await?;

        info!(account = %account_key, tier = %tier.as_str(), "Tier set");

        self.get_subscription(account_key).await?.ok_or_else(|| {
            HubError::Internal(format!(
                "Subscription for {} vanished after upsert",
                account_key
            ))
        })
    }

    /// Mark a subscription inactive. This is the explicit cancellation
    /// path (failed payment, chargeback), distinct from natural lapse.
    pub async fn cancel(&self, account_key: &str) -> HubResult<Subscription> {
        let result = sqlx::query("UPDATE subscriptions SET is_active = 0 WHERE account_key = ?1")
            .bind(account_key)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(HubError::NotFound(format!(
                "No subscription for {}",
                account_key
            )));
        }

        info!(account = %account_key, "Subscription cancelled");

        self.get_subscription(account_key).await?.ok_or_else(|| {
            HubError::Internal(format!(
                "Subscription for {} vanished after cancel",
                account_key
            ))
        })
    }

    /// Fetch the stored record, lapse not applied
    pub async fn get_subscription(&self, account_key: &str) -> HubResult<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT account_key, tier, is_active, started_at, renewed_at, expires_at
            FROM subscriptions
            WHERE account_key = ?1
            "#,
        )
        .bind(account_key)
        .fetch_optional(&self.db)
        .await?;

        Ok(sub)
    }

    /// Tier in force right now. Missing, inactive and lapsed records all
    /// read as Free; the stored row is never touched.
    pub async fn effective_tier(&self, account_key: &str) -> HubResult<Tier> {
        self.effective_tier_at(account_key, Utc::now()).await
    }

    pub(crate) async fn effective_tier_at(
        &self,
        account_key: &str,
        now: DateTime<Utc>,
    ) -> HubResult<Tier> {
        match self.get_subscription(account_key).await? {
            Some(sub) => self.effective_of(&sub, now),
            None => Ok(Tier::Free),
        }
    }

    /// Evaluate a record against an instant
    pub fn effective_of(&self, sub: &Subscription, now: DateTime<Utc>) -> HubResult<Tier> {
        let stored = Tier::parse(&sub.tier).ok_or_else(|| {
            HubError::Internal(format!(
                "Subscription for {} has unknown tier {}",
                sub.account_key, sub.tier
            ))
        })?;

        if !sub.is_active {
            return Ok(Tier::Free);
        }

        Ok(match stored {
            Tier::Free => Tier::Free,
            Tier::Pro => match sub.expires_at {
                // Pro holds strictly before the deadline
                Some(expires_at) if expires_at <= now => Tier::Free,
                _ => Tier::Pro,
            },
        })
    }

    /// Records with their effective tier, newest first, optionally
    /// keeping only those whose effective tier matches
    pub async fn list(&self, tier_filter: Option<Tier>) -> HubResult<Vec<(Subscription, Tier)>> {
        self.list_at(tier_filter, Utc::now()).await
    }

    pub(crate) async fn list_at(
        &self,
        tier_filter: Option<Tier>,
        now: DateTime<Utc>,
    ) -> HubResult<Vec<(Subscription, Tier)>> {
        let rows = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT account_key, tier, is_active, started_at, renewed_at, expires_at
            FROM subscriptions
            ORDER BY started_at DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for sub in rows {
            let effective = self.effective_of(&sub, now)?;
            if tier_filter.map_or(true, |want| want == effective) {
                out.push((sub, effective));
            }
        }

        Ok(out)
    }
}
