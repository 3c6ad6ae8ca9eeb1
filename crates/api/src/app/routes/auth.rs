use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use agrotrack_auth::JwtIssuer;
use agrotrack_core::{Identity, NationalId};

use crate::app::dto::{self, ApiJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::IdentityContext;

const MIN_PASSWORD_LEN: usize = 6;

/// Public routes; the caller layers the auth-tier limiter over these.
pub fn public_router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Routes that need a resolved identity.
pub fn protected_router() -> Router {
    Router::new().route("/profile", get(profile))
}

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(body): ApiJson<dto::RegisterRequest>,
) -> Result<Response, ApiError> {
    let national_id = NationalId::parse(&body.national_id)?;
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let existing = services
        .bounded(services.identities.find_identity_by_national_id(&national_id))
        .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("national id already registered".into()));
    }

    let hash = hash_password(&services, body.password).await?;
    let identity = Identity::new(&body.name, national_id, hash, Utc::now())?;
    // The store re-checks uniqueness; a concurrent registration still ends in Conflict.
    let identity = services.bounded(services.identities.insert_identity(identity)).await?;

    let token = issue_token(&services, &identity)?;
    tracing::info!(user_id = %identity.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "user registered",
            "data": dto::session_to_json(&identity, &token),
        })),
    )
        .into_response())
}

/// Unknown national id and wrong password answer identically.
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    ApiJson(body): ApiJson<dto::LoginRequest>,
) -> Result<Response, ApiError> {
    let national_id = NationalId::parse(&body.national_id).map_err(|_| ApiError::InvalidCredentials)?;
    let identity = services
        .bounded(services.identities.find_identity_by_national_id(&national_id))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let hasher = services.hasher.clone();
    let stored = identity.credential_hash.clone();
    let valid = tokio::task::spawn_blocking(move || hasher.verify(&body.password, &stored))
        .await
        .map_err(|e| ApiError::internal(format!("credential check aborted: {e}")))??;
    if !valid {
        return Err(ApiError::InvalidCredentials);
    }

    let token = issue_token(&services, &identity)?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "login successful",
            "data": dto::session_to_json(&identity, &token),
        })),
    )
        .into_response())
}

pub async fn profile(identity: IdentityContext) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": dto::identity_to_json(identity.identity()),
        })),
    )
        .into_response()
}

async fn hash_password(services: &AppServices, password: String) -> Result<String, ApiError> {
    let hasher = services.hasher.clone();
    let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| ApiError::internal(format!("credential hashing aborted: {e}")))??;
    Ok(hash)
}

fn issue_token(services: &AppServices, identity: &Identity) -> Result<String, ApiError> {
    services
        .tokens
        .issue(identity.id, Utc::now())
        .map_err(|e| ApiError::internal(format!("failed to issue token: {e}")))
}
