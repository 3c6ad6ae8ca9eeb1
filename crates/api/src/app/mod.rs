//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, token service, hasher, rate limiter
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: the error taxonomy and its envelope

use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Extension, Router,
};
use tower::ServiceBuilder;

use agrotrack_infra::config::AppConfig;
use agrotrack_infra::rate_limit::RateTier;

use crate::middleware::{self, RateLimitState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router from configuration (entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(config).await?);
    Ok(build_router(services))
}

/// Guard order per request:
/// payload guard, then the failed-authentication limiter (IP only), then the
/// identity resolver, then the route's rate tier, then the ownership gate
/// (path extractors) or owner-scoped queries in handlers.
pub fn build_router(services: Arc<AppServices>) -> Router {
    let authenticated = || from_fn_with_state(services.clone(), middleware::auth_middleware);
    let limited = |tier: &RateTier| {
        from_fn_with_state(
            RateLimitState::new(services.clone(), tier.clone()),
            middleware::rate_limit_middleware,
        )
    };
    let failed_auth_limited = |tier: &RateTier| {
        from_fn_with_state(
            RateLimitState::new(services.clone(), tier.clone()),
            middleware::failed_auth_limit_middleware,
        )
    };

    let profile = routes::auth::protected_router()
        .route_layer(limited(&services.rate_limits.auth))
        .route_layer(authenticated())
        .route_layer(failed_auth_limited(&services.rate_limits.auth));
    let auth = routes::auth::public_router()
        .route_layer(limited(&services.rate_limits.auth))
        .merge(profile);

    let animals = routes::animals::router()
        .route_layer(limited(&services.rate_limits.general))
        .route_layer(authenticated())
        .route_layer(failed_auth_limited(&services.rate_limits.general));

    let production = routes::production::router()
        .route_layer(limited(&services.rate_limits.sensitive))
        .route_layer(authenticated())
        .route_layer(failed_auth_limited(&services.rate_limits.sensitive));

    let app = Router::new()
        .route("/health", get(routes::system::health))
        .nest("/auth", auth)
        .nest("/animals", animals)
        .nest("/production", production)
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(middleware::method_not_allowed_envelope))
                .layer(Extension(services.clone()))
                .layer(from_fn(middleware::payload_guard)),
        );

    if services.dev_mode {
        app.layer(from_fn(middleware::expose_error_detail))
    } else {
        app
    }
}
