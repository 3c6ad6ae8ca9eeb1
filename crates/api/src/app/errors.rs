use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use agrotrack_auth::CredentialError;
use agrotrack_core::DomainError;
use agrotrack_infra::rate_limit::CounterError;
use agrotrack_infra::store::StoreError;

pub const INTERNAL_MESSAGE: &str = "internal server error";

/// Every failure the API can answer with.
///
/// Rendered as `{success: false, message, error?}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("user no longer exists")]
    UnknownIdentity,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not authorized to access this resource")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_minutes: u64,
        resets_in: Duration,
    },

    #[error("{0}")]
    ValidationFailed(String),

    /// The detail is logged and only shown to clients in development mode.
    #[error("internal server error")]
    Internal(String),
}

/// Internal error detail attached to a response, picked up by the
/// development-mode detail layer.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated
            | ApiError::InvalidToken
            | ApiError::UnknownIdentity
            | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                let mut res = json_error(status, INTERNAL_MESSAGE);
                res.extensions_mut().insert(ErrorDetail(detail));
                res
            }
            ApiError::RateLimited {
                message,
                retry_after_minutes,
                resets_in,
            } => {
                let body = json!({
                    "success": false,
                    "message": message,
                    "retryAfter": retry_after_minutes,
                });
                let mut res = (status, axum::Json(body)).into_response();
                let secs = resets_in.as_secs().max(1);
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    res.headers_mut().insert(header::RETRY_AFTER, value);
                }
                res
            }
            other => json_error(status, other.to_string()),
        }
    }
}

pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "message": message.into(),
        })),
    )
        .into_response()
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::NotFound => ApiError::NotFound("resource"),
            StoreError::Unavailable(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ApiError::ValidationFailed(msg),
            DomainError::NotFound => ApiError::NotFound("resource"),
            DomainError::Conflict(msg) => ApiError::Conflict(msg),
        }
    }
}

impl From<CounterError> for ApiError {
    fn from(err: CounterError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
