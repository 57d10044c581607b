use std::time::Duration;

use crate::actions::tenant_deletion::COOLDOWN_CEILING_HOURS;
use crate::actions::DeletionPolicy;
use crate::store::postgres::DbSettings;

const ADMIN_KEY_PLACEHOLDER: &str = "CHANGE_ME_ADMIN_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub admin_key: String,
    /// `production` makes the placeholder admin key fatal.
    pub env: String,
    /// Set via GATEKEEPER_DELETION_COOLDOWN_HOURS. Default: 24.
    pub deletion_cooldown_hours: i64,
    /// Set via GATEKEEPER_DELETION_MAX_COOLDOWN_HOURS. Default: 168.
    pub deletion_max_cooldown_hours: i64,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Applied as both `lock_timeout` and `statement_timeout` per transaction.
    pub db_statement_timeout_ms: u64,
    /// `json` or anything else for human-readable output.
    pub log_format: String,
}

impl Config {
    pub fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy {
            default_cooldown_hours: self.deletion_cooldown_hours,
            max_cooldown_hours: self.deletion_max_cooldown_hours,
        }
    }

    pub fn db_settings(&self) -> DbSettings {
        DbSettings {
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
            statement_timeout_ms: self.db_statement_timeout_ms,
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let env = std::env::var("GATEKEEPER_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_default();

    let admin_key = std::env::var("GATEKEEPER_ADMIN_KEY")
        .unwrap_or_else(|_| ADMIN_KEY_PLACEHOLDER.into());
    if admin_key == ADMIN_KEY_PLACEHOLDER {
        if env == "production" {
            anyhow::bail!(
                "GATEKEEPER_ADMIN_KEY is still the insecure placeholder. \
                 Set a proper admin key before running in production."
            );
        }
        eprintln!("⚠️  GATEKEEPER_ADMIN_KEY is not set, using insecure placeholder. Set a real key for production.");
    }

    let config = Config {
        port: env_or("GATEKEEPER_PORT", 8480),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/gatekeeper".into()),
        admin_key,
        env,
        deletion_cooldown_hours: env_or("GATEKEEPER_DELETION_COOLDOWN_HOURS", 24),
        deletion_max_cooldown_hours: env_or("GATEKEEPER_DELETION_MAX_COOLDOWN_HOURS", 168),
        db_max_connections: env_or("GATEKEEPER_DB_MAX_CONNECTIONS", 10),
        db_acquire_timeout_secs: env_or("GATEKEEPER_DB_ACQUIRE_TIMEOUT_SECS", 5),
        db_statement_timeout_ms: env_or("GATEKEEPER_DB_STATEMENT_TIMEOUT_MS", 10_000),
        log_format: std::env::var("GATEKEEPER_LOG_FORMAT").unwrap_or_default(),
    };

    check_cooldowns(config.deletion_cooldown_hours, config.deletion_max_cooldown_hours)?;

    Ok(config)
}

fn check_cooldowns(default_hours: i64, max_hours: i64) -> anyhow::Result<()> {
    if default_hours <= 0 || max_hours <= 0 {
        anyhow::bail!("deletion cooldown hours must be positive");
    }
    if default_hours > COOLDOWN_CEILING_HOURS || max_hours > COOLDOWN_CEILING_HOURS {
        anyhow::bail!(
            "deletion cooldown hours must not exceed {}",
            COOLDOWN_CEILING_HOURS
        );
    }
    Ok(())
}
