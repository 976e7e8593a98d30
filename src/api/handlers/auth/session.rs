//! Token issuance and revocation.

use super::{
    credentials::authenticate,
    state::expiry_after,
    token::{extract_token, generate_token, hash_token},
    types::{LoginRequest, LoginResponse},
};
use crate::api::{
    handlers::captcha::CaptchaIssuer,
    reply::{self, ApiError},
    state::AppState,
};
use crate::store::TokenRecord;
use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::HeaderMap,
    response::Response,
    Json,
};
use chrono::Utc;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const INVALID_CREDENTIALS: &str = "Invalid username or password";
const INVALID_CAPTCHA: &str = "Invalid captcha";

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = crate::api::reply::Reply),
        (status = 400, description = "Invalid credentials or captcha", body = crate::api::reply::Reply)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    state: Extension<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = reply::json_body(payload)?;

    if state.config().login_captcha() {
        let (Some(key), Some(value)) = (&request.captcha_key, &request.captcha_value) else {
            return Err(ApiError::field(INVALID_CAPTCHA));
        };
        if !CaptchaIssuer::from_state(&state).verify(key, value).await? {
            return Err(ApiError::field(INVALID_CAPTCHA));
        }
    }

    let username = request.username.trim();
    let Some(identity) = authenticate(
        state.accounts(),
        request.kind,
        username,
        request.password.expose_secret(),
    )
    .await?
    else {
        debug!(kind = request.kind.as_str(), "Login rejected");
        return Err(ApiError::field(INVALID_CREDENTIALS));
    };

    let token = generate_token()?;
    let issued_at = Utc::now();
    let ttl = state.config().token_ttl_seconds();
    let expires_at = expiry_after(issued_at, ttl)
        .ok_or_else(|| ApiError::Internal(format!("token TTL out of range: {ttl}s")))?;
    state
        .accounts()
        .insert_token(TokenRecord {
            token_hash: hash_token(&token),
            identity_id: identity.id,
            issued_at,
            expires_at,
            valid: true,
        })
        .await?;

    info!(identity_id = %identity.id, kind = identity.kind.as_str(), "Token issued");
    reply::ok(&LoginResponse { token, expires_at })
}

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Token revoked (or there was nothing to revoke)", body = crate::api::reply::Reply)
    ),
    security((), ("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    if let Some(token) = extract_token(&headers) {
        // Unknown tokens are fine; logout always acknowledges.
        if !state.accounts().revoke_token(&hash_token(&token)).await? {
            debug!("Logout with unknown token");
        }
    }
    Ok(reply::ack())
}

