//! Caller resolution.
//!
//! Flow Overview: read the bearer token, hash it, resolve it to an identity and
//! derive a [`Role`]. Roles are never stored; they follow from the identity's
//! kind and admin flag on every request. The resolved [`Caller`] is passed
//! explicitly to whatever needs it.

use super::token::{extract_token, hash_token};
use crate::api::reply::ApiError;
use crate::store::{AccountStore, Identity, IdentityKind};
use axum::http::HeaderMap;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
    Member,
    Anonymous,
}

impl Role {
    #[must_use]
    pub fn of(identity: &Identity) -> Self {
        if identity.is_admin {
            Self::Admin
        } else {
            match identity.kind {
                IdentityKind::Staff => Self::Staff,
                IdentityKind::Member => Self::Member,
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Member => "member",
            Self::Anonymous => "anonymous",
        }
    }
}

/// What the presented token turned out to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// No `Authorization` header (or an unsupported scheme).
    Missing,
    Active,
    /// Known and never revoked, but past `expires_at`.
    Expired,
    /// Unknown, revoked, or owned by a missing or inactive identity.
    Rejected,
}

#[derive(Clone, Debug)]
pub struct Caller {
    pub role: Role,
    /// Set for `Active` and `Expired` tokens.
    pub identity: Option<Identity>,
    pub token: TokenState,
    pub token_hash: Option<Vec<u8>>,
}

impl Caller {
    #[must_use]
    pub const fn anonymous(token: TokenState, token_hash: Option<Vec<u8>>) -> Self {
        Self {
            role: Role::Anonymous,
            identity: None,
            token,
            token_hash,
        }
    }

    /// The identity behind a live token, if any.
    #[must_use]
    pub fn active_identity(&self) -> Option<&Identity> {
        if self.token == TokenState::Active {
            self.identity.as_ref()
        } else {
            None
        }
    }
}

/// Resolve the request's bearer token into a [`Caller`].
///
/// Expired tokens still identify their owner so that workflows can tell an
/// expired session apart from a foreign one; gates decide what to do with it.
///
/// # Errors
/// Returns [`ApiError::Internal`] if the store lookup fails.
pub async fn resolve_caller(
    headers: &HeaderMap,
    accounts: &dyn AccountStore,
) -> Result<Caller, ApiError> {
    let Some(token) = extract_token(headers) else {
        return Ok(Caller::anonymous(TokenState::Missing, None));
    };
    // Only the hash is stored; never compare raw tokens against the store.
    let token_hash = hash_token(&token);

    let record = match accounts.token(&token_hash).await? {
        Some(record) if record.valid => record,
        Some(_) => {
            debug!("Presented token was revoked");
            return Ok(Caller::anonymous(TokenState::Rejected, Some(token_hash)));
        }
        None => {
            debug!("Presented token is unknown");
            return Ok(Caller::anonymous(TokenState::Rejected, Some(token_hash)));
        }
    };

    let identity = match accounts.identity_by_id(record.identity_id).await? {
        Some(identity) if identity.is_active => identity,
        _ => return Ok(Caller::anonymous(TokenState::Rejected, Some(token_hash))),
    };

    let token = if record.is_expired(Utc::now()) {
        TokenState::Expired
    } else {
        TokenState::Active
    };

    Ok(Caller {
        role: Role::of(&identity),
        identity: Some(identity),
        token,
        token_hash: Some(token_hash),
    })
}
