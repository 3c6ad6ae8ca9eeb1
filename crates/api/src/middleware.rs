//! Request guards: identity resolution, payload shape and rate limits.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use agrotrack_auth::JwtValidator;
use agrotrack_infra::rate_limit::{RateDecision, RateTier};

use crate::app::errors::{ApiError, ErrorDetail};
use crate::app::services::AppServices;
use crate::context::{IdentityContext, client_ip};

/// Largest accepted request body.
pub const MAX_PAYLOAD_BYTES: usize = 100 * 1024;

/// Deepest accepted JSON value (the root is depth 0).
pub const MAX_PAYLOAD_DEPTH: usize = 10;

/// Resolve the bearer token into a stored identity.
///
/// - no `Authorization: Bearer <token>` header: `Unauthenticated`
/// - bad signature, expired, malformed claims: `InvalidToken`
/// - subject no longer exists: `UnknownIdentity`
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers())?;

    let claims = services.tokens.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        ApiError::InvalidToken
    })?;

    let identity = services
        .bounded(services.identities.find_identity_by_id(claims.sub))
        .await?
        .ok_or(ApiError::UnknownIdentity)?;

    req.extensions_mut().insert(IdentityContext::new(identity));
    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .ok_or(ApiError::Unauthenticated)?;

    let header = header.to_str().map_err(|_| ApiError::Unauthenticated)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthenticated)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(ApiError::Unauthenticated);
    }

    Ok(token)
}

/// Reject oversized or too deeply nested bodies before any handler or
/// ownership check sees them.
pub async fn payload_guard(req: Request, next: Next) -> Result<Response, ApiError> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_PAYLOAD_BYTES) {
        return Err(too_large());
    }

    let (parts, body) = req.into_parts();
    let bytes: Bytes = axum::body::to_bytes(body, MAX_PAYLOAD_BYTES)
        .await
        .map_err(|_| too_large())?;

    if exceeds_depth(&bytes, MAX_PAYLOAD_DEPTH) {
        return Err(ApiError::PayloadTooLarge(format!(
            "payload structure too deep; maximum nesting is {MAX_PAYLOAD_DEPTH} levels"
        )));
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

fn too_large() -> ApiError {
    ApiError::PayloadTooLarge(format!(
        "payload too large; maximum size is {}KB",
        MAX_PAYLOAD_BYTES / 1024
    ))
}

/// Structural depth scan over raw JSON text.
///
/// Every value nested inside `n` open objects/arrays sits at depth `n`. The
/// scan works on bytes, so it is not bounded by a parser's recursion limit
/// and malformed input is left for the JSON extractor to reject.
pub fn exceeds_depth(body: &[u8], max_depth: usize) -> bool {
    let mut open = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for &b in body {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'{' | b'[' => {
                if open > max_depth {
                    return true;
                }
                open += 1;
            }
            b'}' | b']' => open = open.saturating_sub(1),
            b' ' | b'\t' | b'\n' | b'\r' | b':' | b',' => {}
            b'"' => {
                if open > max_depth {
                    return true;
                }
                in_string = true;
            }
            _ => {
                if open > max_depth {
                    return true;
                }
            }
        }
    }
    false
}

/// Per-route limiter state: the shared services plus the tier to enforce.
#[derive(Clone)]
pub struct RateLimitState {
    pub services: Arc<AppServices>,
    pub tier: Arc<RateTier>,
}

impl RateLimitState {
    pub fn new(services: Arc<AppServices>, tier: RateTier) -> Self {
        Self {
            services,
            tier: Arc::new(tier),
        }
    }
}

/// Counter key: client IP, plus the identity when one has been resolved.
pub fn rate_key(ip: Option<std::net::IpAddr>, identity: Option<&IdentityContext>) -> String {
    let ip = ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
    match identity {
        Some(identity) => format!("{ip}:{}", identity.user_id()),
        None => ip,
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = rate_key(
        client_ip(req.extensions()),
        req.extensions().get::<IdentityContext>(),
    );

    match state.services.limiter.check(&state.tier, &key).await? {
        RateDecision::Limited {
            retry_after_minutes,
            resets_in,
            ..
        } => {
            tracing::warn!(tier = %state.tier.name, key = %key, "rate limit exceeded");
            Err(ApiError::RateLimited {
                message: state.tier.message.clone(),
                retry_after_minutes,
                resets_in,
            })
        }
        RateDecision::Allowed { limit, remaining } => {
            let mut res = next.run(req).await;
            let headers = res.headers_mut();
            headers.insert("ratelimit-limit", HeaderValue::from(limit));
            headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
            Ok(res)
        }
    }
}

/// Count failed authentications against the route's tier, keyed by IP alone.
///
/// Sits outside the identity resolver. Once an IP has used up the tier's
/// budget on failures, its requests are refused before any token is decoded.
pub async fn failed_auth_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = rate_key(client_ip(req.extensions()), None);

    if let RateDecision::Limited {
        retry_after_minutes,
        resets_in,
        ..
    } = state.services.limiter.peek(&state.tier, &key).await?
    {
        tracing::warn!(tier = %state.tier.name, key = %key, "too many failed authentications");
        return Err(ApiError::RateLimited {
            message: state.tier.message.clone(),
            retry_after_minutes,
            resets_in,
        });
    }

    let res = next.run(req).await;
    if res.status() == StatusCode::UNAUTHORIZED {
        state.services.limiter.check(&state.tier, &key).await?;
    }
    Ok(res)
}

/// Give axum's bare 405 the standard error envelope. The `Allow` header is kept.
pub async fn method_not_allowed_envelope(req: Request, next: Next) -> Response {
    let res = next.run(req).await;
    if res.status() != StatusCode::METHOD_NOT_ALLOWED {
        return res;
    }
    let (mut parts, _) = res.into_parts();
    let body = crate::app::errors::json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    let (body_parts, body) = body.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    if let Some(content_type) = body_parts.headers.get(header::CONTENT_TYPE) {
        parts.headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    Response::from_parts(parts, body)
}

/// Development mode: copy internal error detail into the response body.
pub async fn expose_error_detail(req: Request, next: Next) -> Response {
    let res = next.run(req).await;
    let Some(ErrorDetail(detail)) = res.extensions().get::<ErrorDetail>().cloned() else {
        return res;
    };
    let (mut parts, _) = res.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let body = serde_json::json!({
        "success": false,
        "message": crate::app::errors::INTERNAL_MESSAGE,
        "error": detail,
    });
    Response::from_parts(parts, Body::from(body.to_string()))
}
