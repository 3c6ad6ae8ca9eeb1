//! Process configuration read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use agrotrack_auth::HashCost;
use agrotrack_observability::LogFormat;

use crate::rate_limit::RateLimitConfig;

pub const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    /// `APP_ENV=development`: internal error detail is returned to clients.
    pub dev_mode: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub store_timeout: Duration,
    pub log_format: LogFormat,
    pub rate_limits: RateLimitConfig,
    pub hash_cost: HashCost,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl: chrono::Duration::hours(24),
            dev_mode: false,
            database_url: None,
            redis_url: None,
            store_timeout: Duration::from_millis(5000),
            log_format: LogFormat::Json,
            rate_limits: RateLimitConfig::default(),
            hash_cost: HashCost::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset or blank
    /// variables fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(addr) = get("BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|e| invalid("BIND_ADDR", e))?;
        }
        if let Some(secret) = get("JWT_SECRET") {
            config.jwt_secret = secret;
        }
        if let Some(hours) = get("TOKEN_TTL_HOURS") {
            let hours: i64 = hours.parse().map_err(|e| invalid("TOKEN_TTL_HOURS", e))?;
            if hours <= 0 {
                return Err(invalid("TOKEN_TTL_HOURS", "must be positive"));
            }
            config.token_ttl = chrono::Duration::hours(hours);
        }
        if let Some(env) = get("APP_ENV") {
            config.dev_mode = env.eq_ignore_ascii_case("development");
        }
        config.database_url = get("DATABASE_URL");
        config.redis_url = get("REDIS_URL");
        if let Some(ms) = get("STORE_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|e| invalid("STORE_TIMEOUT_MS", e))?;
            if ms == 0 {
                return Err(invalid("STORE_TIMEOUT_MS", "must be positive"));
            }
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(format) = get("LOG_FORMAT") {
            config.log_format = format.parse().map_err(|e| invalid("LOG_FORMAT", e))?;
        }

        Ok(config)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn invalid(var: &'static str, reason: impl core::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}
