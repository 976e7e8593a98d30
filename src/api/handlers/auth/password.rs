//! Staff password reset (credential rotation).
//!
//! Flow Overview: the route only accepts `POST` (anything else answers
//! `NOT_ALLOWED` before any other check). The caller must then pass the
//! staff-only gate, present a live token, repeat the new password exactly,
//! satisfy the password policy and re-authenticate with the previous password.
//! The new hash is stored and every token of the identity is revoked in one
//! store operation.
//!
//! Security boundaries: steps after the gate run under a per-identity lock,
//! and the token is re-validated inside it so a rotation that lost the race
//! sees its own token already revoked.

use super::{
    credentials::{check_policy, hash_password, verify_password},
    gate::AccessGate,
    principal::{resolve_caller, TokenState},
    types::ResetPasswordRequest,
};
use crate::api::{
    reply::{self, ApiError},
    state::AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::HeaderMap,
    response::Response,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};

pub const PASSWORDS_DIDNT_MATCH: &str = "Passwords didn't match";
pub const INCORRECT_PREVIOUS_PASSWORD: &str = "Incorrect previous password";

#[utoipa::path(
    post,
    path = "/reset_password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed, every token of the identity revoked", body = crate::api::reply::Reply),
        (status = 400, description = "Mismatch, policy violation or wrong previous password", body = crate::api::reply::Reply),
        (status = 401, description = "Unknown or revoked token", body = crate::api::reply::Reply),
        (status = 403, description = "Caller is not staff", body = crate::api::reply::Reply),
        (status = 405, description = "Wrong method, or no live token", body = crate::api::reply::Reply)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn reset_password(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&headers, state.accounts()).await?;
    AccessGate::STAFF_ONLY.check(&caller)?;

    let (Some(identity), Some(token_hash)) = (caller.identity, caller.token_hash) else {
        return Err(ApiError::NotAllowed);
    };
    if caller.token != TokenState::Active {
        return Err(ApiError::NotAllowed);
    }

    let _guard = state.rotation_locks().lock(identity.id).await;

    // A concurrent rotation may have revoked this token while we waited.
    let live = state
        .accounts()
        .token(&token_hash)
        .await?
        .is_some_and(|token| token.valid && !token.is_expired(Utc::now()));
    if !live {
        return Err(ApiError::NotAllowed);
    }

    let request = reply::json_body(payload)?;

    if request.repeat_password() != request.new_password() {
        return Err(ApiError::field(PASSWORDS_DIDNT_MATCH));
    }
    // Both absent passes the comparison; the empty string then fails policy.
    let new_password = request.new_password().unwrap_or_default();
    check_policy(new_password)?;

    // Re-read the owner so the previous password is checked against the
    // current hash, not the one seen before the lock.
    let Some(owner) = state.accounts().identity_by_id(identity.id).await? else {
        return Err(ApiError::NotAllowed);
    };
    let prev_password = request.prev_password().unwrap_or_default();
    if prev_password.is_empty() || !verify_password(prev_password, &owner.password_hash) {
        return Err(ApiError::field(INCORRECT_PREVIOUS_PASSWORD));
    }

    let password_hash = hash_password(new_password)?;
    if !state
        .accounts()
        .rotate_credential(owner.id, &password_hash)
        .await?
    {
        return Err(ApiError::NotAllowed);
    }

    info!(identity_id = %owner.id, "Password rotated; all tokens revoked");
    Ok(reply::ack())
}
