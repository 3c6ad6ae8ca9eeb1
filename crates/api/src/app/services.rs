//! Service wiring: stores, token service, hasher and rate limiter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agrotrack_auth::{Argon2Hasher, CredentialHasher, Hs256JwtValidator};
use agrotrack_infra::config::AppConfig;
use agrotrack_infra::rate_limit::{RateLimitConfig, RateLimiter};
use agrotrack_infra::store::{IdentityStore, InMemoryStore, LivestockStore, PostgresStore, StoreResult};

use crate::app::errors::ApiError;
use crate::authz::OwnershipGate;

/// Shared application services, constructed once at startup.
pub struct AppServices {
    pub store: Arc<dyn LivestockStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub tokens: Arc<Hs256JwtValidator>,
    pub hasher: Arc<dyn CredentialHasher>,
    pub limiter: RateLimiter,
    pub rate_limits: RateLimitConfig,
    pub store_timeout: Duration,
    pub dev_mode: bool,
}

impl AppServices {
    /// Services over a fresh in-memory store and counters.
    pub fn in_memory(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(InMemoryStore::new());
        Self::assemble(config, store.clone(), store, RateLimiter::in_memory())
    }

    fn assemble(
        config: &AppConfig,
        store: Arc<dyn LivestockStore>,
        identities: Arc<dyn IdentityStore>,
        limiter: RateLimiter,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            identities,
            tokens: Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes(), config.token_ttl)),
            hasher: Arc::new(Argon2Hasher::new(config.hash_cost)?),
            limiter,
            rate_limits: config.rate_limits.clone(),
            store_timeout: config.store_timeout,
            dev_mode: config.dev_mode,
        })
    }

    pub fn gate(&self) -> OwnershipGate<'_, dyn LivestockStore> {
        OwnershipGate::new(&*self.store, self.store_timeout)
    }

    /// Run a store call under the configured timeout. A timeout is an
    /// internal error, never a denial.
    pub async fn bounded<T, F>(&self, call: F) -> Result<T, ApiError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        bounded(self.store_timeout, call).await
    }
}

pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, ApiError>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(_) => Err(ApiError::internal(format!(
            "store call timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Build services from configuration: Postgres when `DATABASE_URL` is set,
/// Redis counters when `REDIS_URL` is set and the `redis` feature is on.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let limiter = build_limiter(config).await?;

    match &config.database_url {
        Some(url) => {
            let store = Arc::new(PostgresStore::connect(url, 10).await?);
            store.initialize().await?;
            tracing::info!("using postgres store");
            AppServices::assemble(config, store.clone(), store, limiter)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            let store = Arc::new(InMemoryStore::new());
            AppServices::assemble(config, store.clone(), store, limiter)
        }
    }
}

#[cfg(feature = "redis")]
async fn build_limiter(config: &AppConfig) -> anyhow::Result<RateLimiter> {
    use agrotrack_infra::rate_limit::RedisCounterStore;

    match &config.redis_url {
        Some(url) => {
            let counters = RedisCounterStore::connect(url).await?;
            tracing::info!("using redis rate-limit counters");
            Ok(RateLimiter::new(Arc::new(counters)))
        }
        None => Ok(RateLimiter::in_memory()),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_limiter(config: &AppConfig) -> anyhow::Result<RateLimiter> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-memory counters");
    }
    Ok(RateLimiter::in_memory())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrotrack_infra::store::StoreError;

    #[tokio::test]
    async fn timeouts_surface_as_internal_errors() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(())
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn store_errors_pass_through() {
        let failing = async { Err::<(), _>(StoreError::Conflict("dup".into())) };
        let err = bounded(Duration::from_secs(1), failing).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
