/// Quota tracker: atomic daily metering against the effective tier
use crate::config::QuotaConfig;
use crate::db::models::UsageRecord;
use crate::error::{HubError, HubResult};
use crate::identity::{AccountIdentifier, IdentityGraph};
use crate::subscriptions::{SubscriptionRegistry, Tier};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{bucket_resets_at, day_bucket, QuotaDecision};

/// Quota tracker service
///
/// The gate is a single conditional UPDATE: it increments only while
/// the counter is under the cap, so two racing requests can never both
/// take the last slot. Denials write nothing.
#[derive(Clone)]
pub struct QuotaTracker {
    db: SqlitePool,
    graph: IdentityGraph,
    registry: SubscriptionRegistry,
    quota: QuotaConfig,
}

impl QuotaTracker {
    pub fn new(
        db: SqlitePool,
        graph: IdentityGraph,
        registry: SubscriptionRegistry,
        quota: QuotaConfig,
    ) -> Self {
        Self {
            db,
            graph,
            registry,
            quota,
        }
    }

    /// Metering front door: resolve the caller, then spend one request.
    /// Unknown identifiers are an error, never a silent allow.
    pub async fn check_identifier(&self, identifier: &AccountIdentifier) -> HubResult<QuotaDecision> {
        self.check_identifier_at(identifier, Utc::now()).await
    }

    pub(crate) async fn check_identifier_at(
        &self,
        identifier: &AccountIdentifier,
        now: DateTime<Utc>,
    ) -> HubResult<QuotaDecision> {
        let account = self.graph.resolve_required(identifier).await?;
        self.check_and_increment_at(&account.account_key, now).await
    }

    /// Spend one request from today's allowance, atomically. The tier
    /// (and with it the cap) is looked up fresh on every call.
    pub async fn check_and_increment(&self, account_key: &str) -> HubResult<QuotaDecision> {
        self.check_and_increment_at(account_key, Utc::now()).await
    }

    pub(crate) async fn check_and_increment_at(
        &self,
        account_key: &str,
        now: DateTime<Utc>,
    ) -> HubResult<QuotaDecision> {
        let bucket = day_bucket(now);
        let tier = self.registry.effective_tier_at(account_key, now).await?;
        let limit = self.quota.daily_limit_for(tier);

        // Seed today's row; rollover is just this insert keying a new day
        sqlx::query(
            r#"
            INSERT INTO usage_records (account_key, day_bucket, requests_used, limit_snapshot, updated_at)
            VALUES (?1, ?2, 0, NULL, ?3)
            ON CONFLICT(account_key, day_bucket) DO NOTHING
            "#,
        )
        .bind(account_key)
        .bind(bucket)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|err| {
            if is_fk_violation(&err) {
                HubError::NotFound(format!("No account {}", account_key))
            } else {
                HubError::Database(err)
            }
        })?;

        // The check and the increment are one guarded statement
        let result = sqlx::query(
            r#"
            UPDATE usage_records
            SET requests_used = requests_used + 1, limit_snapshot = ?1, updated_at = ?2
            WHERE account_key = ?3 AND day_bucket = ?4
              AND (?1 IS NULL OR requests_used < ?1)
            "#,
        )
        .bind(limit)
        .bind(now)
        .bind(account_key)
        .bind(bucket)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            let limit = limit.ok_or_else(|| {
                HubError::Internal(format!(
                    "Unmetered increment denied for {}",
                    account_key
                ))
            })?;
            debug!(account = %account_key, limit, "Quota exhausted");
            crate::metrics::record_quota_decision(tier.as_str(), false);
            return Err(HubError::QuotaExceeded {
                limit,
                resets_at: bucket_resets_at(bucket),
            });
        }

        let record = self.get_record(account_key, bucket).await?.ok_or_else(|| {
            HubError::Internal(format!(
                "Usage record for {} vanished after increment",
                account_key
            ))
        })?;

        crate::metrics::record_quota_decision(tier.as_str(), true);

        Ok(QuotaDecision {
            account_key: account_key.to_string(),
            tier,
            day_bucket: bucket,
            used: record.requests_used,
            limit,
            remaining: limit.map(|l| (l - record.requests_used).max(0)),
            resets_at: bucket_resets_at(bucket),
        })
    }

    /// Read-only view of today's usage; never increments
    pub async fn current_usage(&self, account_key: &str) -> HubResult<QuotaDecision> {
        self.current_usage_at(account_key, Utc::now()).await
    }

    pub(crate) async fn current_usage_at(
        &self,
        account_key: &str,
        now: DateTime<Utc>,
    ) -> HubResult<QuotaDecision> {
        let bucket = day_bucket(now);
        let tier = self.registry.effective_tier_at(account_key, now).await?;
        let limit = self.quota.daily_limit_for(tier);
        let used = self
            .get_record(account_key, bucket)
            .await?
            .map(|r| r.requests_used)
            .unwrap_or(0);

        Ok(QuotaDecision {
            account_key: account_key.to_string(),
            tier,
            day_bucket: bucket,
            used,
            limit,
            remaining: limit.map(|l| (l - used).max(0)),
            resets_at: bucket_resets_at(bucket),
        })
    }

    /// Fetch one day's counter for an account
    pub async fn get_record(
        &self,
        account_key: &str,
        bucket: i64,
    ) -> HubResult<Option<UsageRecord>> {
        let record = sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT account_key, day_bucket, requests_used, limit_snapshot, updated_at
            FROM usage_records
            WHERE account_key = ?1 AND day_bucket = ?2
            "#,
        )
        .bind(account_key)
        .bind(bucket)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// Usage rows for one bucket, busiest first, optionally filtered by
    /// the account's effective tier and capped to the top N
    pub async fn list_usage(
        &self,
        bucket: i64,
        tier_filter: Option<Tier>,
        top: Option<i64>,
    ) -> HubResult<Vec<(UsageRecord, Tier)>> {
        self.list_usage_at(bucket, tier_filter, top, Utc::now()).await
    }

    pub(crate) async fn list_usage_at(
        &self,
        bucket: i64,
        tier_filter: Option<Tier>,
        top: Option<i64>,
        now: DateTime<Utc>,
    ) -> HubResult<Vec<(UsageRecord, Tier)>> {
        let rows = sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT account_key, day_bucket, requests_used, limit_snapshot, updated_at
            FROM usage_records
            WHERE day_bucket = ?1
            ORDER BY requests_used DESC, account_key ASC
            "#,
        )
        .bind(bucket)
        .fetch_all(&self.db)
        .await?;

        let mut out = Vec::new();
        for record in rows {
            let tier = self
                .registry
                .effective_tier_at(&record.account_key, now)
                .await?;
            if tier_filter.map_or(true, |want| want == tier) {
                out.push((record, tier));
            }
            if let Some(top) = top {
                if out.len() as i64 >= top {
                    break;
                }
            }
        }

        Ok(out)
    }

    /// Drop usage rows older than the retention horizon. Past days are
    /// never edited, only eventually dropped. Returns rows deleted.
    pub async fn prune_usage(&self) -> HubResult<u64> {
        self.prune_usage_at(Utc::now()).await
    }

    pub(crate) async fn prune_usage_at(&self, now: DateTime<Utc>) -> HubResult<u64> {
        let horizon = day_bucket(now) - self.quota.usage_retention_days;

        let result = sqlx::query("DELETE FROM usage_records WHERE day_bucket < ?1")
            .bind(horizon)
            .execute(&self.db)
            .await?;

        let pruned = result.rows_affected();
        if pruned > 0 {
            info!(pruned, horizon, "Old usage records pruned");
        }

        Ok(pruned)
    }
}

fn is_fk_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_foreign_key_violation())
        .unwrap_or(false)
}
