/// Configuration management for Propel Hub
use crate::error::{HubError, HubResult};
use crate::subscriptions::Tier;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub invites: InviteConfig,
    pub quota: QuotaConfig,
    pub admin: AdminConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub hub_db: PathBuf,
}

/// Invite and link-token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteConfig {
    /// Default lifetime of a startup invite, in seconds
    pub startup_ttl_secs: i64,
    /// Default lifetime of a team invite, in seconds
    pub team_ttl_secs: i64,
    /// Default lifetime of a platform-link token, in seconds
    pub link_ttl_secs: i64,
}

/// Daily quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Daily request cap for Free accounts
    pub free_daily_limit: i64,
    /// Daily request cap for Pro accounts; None means unmetered
    pub pro_daily_limit: Option<i64>,
    /// Days of usage records to keep before pruning
    pub usage_retention_days: i64,
}

impl QuotaConfig {
    /// Daily cap applied to a tier. None means no cap.
    pub fn daily_limit_for(&self, tier: Tier) -> Option<i64> {
        match tier {
            Tier::Free => Some(self.free_daily_limit),
            Tier::Pro => self.pro_daily_limit,
        }
    }
}

/// Admin surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Account key(s) allowed to access admin endpoints (comma-separated)
    pub admin_keys: Vec<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub global_requests_per_minute: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> HubResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("HUB_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("HUB_PORT")
            .unwrap_or_else(|_| "7319".to_string())
            .parse()
            .map_err(|_| HubError::Validation("Invalid port number".to_string()))?;
        let version = env::var("HUB_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("HUB_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let hub_db = env::var("HUB_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("hub.sqlite"));

        let startup_ttl_secs = env::var("HUB_INVITE_STARTUP_TTL_SECS")
            .unwrap_or_else(|_| "2592000".to_string())
            .parse()
            .unwrap_or(2_592_000);
        let team_ttl_secs = env::var("HUB_INVITE_TEAM_TTL_SECS")
            .unwrap_or_else(|_| "604800".to_string())
            .parse()
            .unwrap_or(604_800);
        let link_ttl_secs = env::var("HUB_LINK_TOKEN_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .unwrap_or(3_600);

        let free_daily_limit = env::var("HUB_QUOTA_FREE_DAILY_LIMIT")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .unwrap_or(50);
        let pro_daily_limit = env::var("HUB_QUOTA_PRO_DAILY_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok());
        let usage_retention_days = env::var("HUB_USAGE_RETENTION_DAYS")
            .unwrap_or_else(|_| "90".to_string())
            .parse()
            .unwrap_or(90);

        // Parse admin keys from comma-separated list
        let admin_keys = env::var("HUB_ADMIN_KEYS")
            .unwrap_or_else(|_| String::new())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<String>>();

        let rate_limit_enabled = env::var("HUB_RATE_LIMITS_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let rate_limit_requests = env::var("HUB_RATE_LIMIT_GLOBAL_REQUESTS_PER_MINUTE")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                hub_db,
            },
            invites: InviteConfig {
                startup_ttl_secs,
                team_ttl_secs,
                link_ttl_secs,
            },
            quota: QuotaConfig {
                free_daily_limit,
                pro_daily_limit,
                usage_retention_days,
            },
            admin: AdminConfig { admin_keys },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                global_requests_per_minute: rate_limit_requests,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> HubResult<()> {
        if self.service.hostname.is_empty() {
            return Err(HubError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.invites.startup_ttl_secs <= 0
            || self.invites.team_ttl_secs <= 0
            || self.invites.link_ttl_secs <= 0
        {
            return Err(HubError::Validation(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        if self.quota.free_daily_limit < 0 {
            return Err(HubError::Validation(
                "Free tier daily limit cannot be negative".to_string(),
            ));
        }

        if self.quota.usage_retention_days <= 0 {
            return Err(HubError::Validation(
                "Usage retention must be at least one day".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota_config() -> QuotaConfig {
        QuotaConfig {
            free_daily_limit: 50,
            pro_daily_limit: None,
            usage_retention_days: 90,
        }
    }

    fn base_config() -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 7319,
                version: "0.1.0".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                hub_db: PathBuf::from("./data/hub.sqlite"),
            },
            invites: InviteConfig {
                startup_ttl_secs: 2_592_000,
                team_ttl_secs: 604_800,
                link_ttl_secs: 3_600,
            },
            quota: quota_config(),
            admin: AdminConfig { admin_keys: vec![] },
            rate_limit: RateLimitConfig {
                enabled: true,
                global_requests_per_minute: 3000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_defaults_and_rejects_nonsense() {
        assert!(base_config().validate().is_ok());

        let mut bad = base_config();
        bad.service.hostname = String::new();
        assert!(bad.validate().is_err());

        let mut bad = base_config();
        bad.invites.link_ttl_secs = 0;
        assert!(bad.validate().is_err());

        let mut bad = base_config();
        bad.quota.free_daily_limit = -1;
        assert!(bad.validate().is_err());

        let mut bad = base_config();
        bad.quota.usage_retention_days = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn free_tier_is_capped_pro_is_not() {
        let quota = quota_config();
        assert_eq!(quota.daily_limit_for(Tier::Free), Some(50));
        assert_eq!(quota.daily_limit_for(Tier::Pro), None);
    }

    #[test]
    fn pro_ceiling_applies_when_configured() {
        let quota = QuotaConfig {
            pro_daily_limit: Some(10_000),
            ..quota_config()
        };
        assert_eq!(quota.daily_limit_for(Tier::Pro), Some(10_000));
    }
}
