//! Staff and member collections.

use super::{
    to_json,
    types::{IdentityPayload, IdentityView, PublicIdentity},
    Collection,
};
use crate::api::{
    handlers::auth::credentials::{check_policy, hash_password},
    reply::ApiError,
    state::AppState,
};
use crate::store::{
    Identity, IdentityChanges, IdentityKind, ListQuery, NewIdentity, Page, StoreError,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Projection {
    Admin,
    Public,
}

pub struct IdentityCollection {
    kind: IdentityKind,
    projection: Projection,
}

impl IdentityCollection {
    /// Every field except the password hash.
    #[must_use]
    pub const fn admin(kind: IdentityKind) -> Self {
        Self {
            kind,
            projection: Projection::Admin,
        }
    }

    /// `id`, `username` and `display_name` only.
    #[must_use]
    pub const fn public(kind: IdentityKind) -> Self {
        Self {
            kind,
            projection: Projection::Public,
        }
    }

    fn project(&self, identity: Identity) -> Result<Value, ApiError> {
        match self.projection {
            Projection::Admin => to_json(IdentityView::from(identity)),
            Projection::Public => to_json(PublicIdentity::from(identity)),
        }
    }

    fn decode(payload: Map<String, Value>) -> Result<IdentityPayload, ApiError> {
        serde_json::from_value(Value::Object(payload))
            .map_err(|err| ApiError::Validation(err.to_string()))
    }

    fn check_admin_flag(&self, is_admin: Option<bool>) -> Result<(), ApiError> {
        if self.kind == IdentityKind::Member && is_admin == Some(true) {
            return Err(ApiError::Validation(
                "is_admin is only valid for staff".to_string(),
            ));
        }
        Ok(())
    }
}

fn normalize_username(username: &str) -> Result<String, ApiError> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        Err(ApiError::field("username may not be blank"))
    } else {
        Ok(trimmed.to_string())
    }
}

fn username_conflict(err: StoreError) -> ApiError {
    match err {
        StoreError::Conflict => ApiError::field("username already exists"),
        other => other.into(),
    }
}

#[async_trait]
impl Collection for IdentityCollection {
    async fn list(&self, state: &AppState, query: &ListQuery) -> Result<Page<Value>, ApiError> {
        let page = state.accounts().list_identities(self.kind, query).await?;
        let items = page
            .items
            .into_iter()
            .map(|identity| self.project(identity))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            count: page.count,
            items,
        })
    }

    async fn retrieve(&self, state: &AppState, id: Uuid) -> Result<Value, ApiError> {
        let identity = state
            .accounts()
            .identity(self.kind, id)
            .await?
            .ok_or(ApiError::NotFound)?;
        self.project(identity)
    }

    async fn create(
        &self,
        state: &AppState,
        payload: Map<String, Value>,
    ) -> Result<Value, ApiError> {
        let payload = Self::decode(payload)?;
        self.check_admin_flag(payload.is_admin)?;

        let username = payload
            .username
            .as_deref()
            .ok_or_else(|| ApiError::field("username is required"))
            .and_then(normalize_username)?;
        let password = payload
            .password
            .ok_or_else(|| ApiError::field("password is required"))?;
        check_policy(password.expose_secret())?;

        let identity = state
            .accounts()
            .insert_identity(NewIdentity {
                kind: self.kind,
                username,
                password_hash: hash_password(password.expose_secret())?,
                is_admin: payload.is_admin.unwrap_or(false),
                is_active: payload.is_active.unwrap_or(true),
                display_name: payload.display_name,
            })
            .await
            .map_err(username_conflict)?;

        info!(identity_id = %identity.id, kind = self.kind.as_str(), "Identity created");
        self.project(identity)
    }

    async fn update(
        &self,
        state: &AppState,
        id: Uuid,
        payload: Map<String, Value>,
    ) -> Result<Value, ApiError> {
        let payload = Self::decode(payload)?;
        self.check_admin_flag(payload.is_admin)?;

        let password_hash = match &payload.password {
            Some(password) => {
                check_policy(password.expose_secret())?;
                Some(hash_password(password.expose_secret())?)
            }
            None => None,
        };
        let changes = IdentityChanges {
            username: payload
                .username
                .as_deref()
                .map(normalize_username)
                .transpose()?,
            password_hash,
            is_admin: payload.is_admin,
            is_active: payload.is_active,
            display_name: payload.display_name,
        };

        // Setting a password is a rotation: it waits for any reset of the
        // same identity and revokes its tokens along with the field changes.
        let rotates = changes.password_hash.is_some();
        let _guard = if rotates {
            Some(state.rotation_locks().lock(id).await)
        } else {
            None
        };
        let identity = state
            .accounts()
            .update_identity(self.kind, id, changes)
            .await
            .map_err(username_conflict)?
            .ok_or(ApiError::NotFound)?;
        if rotates {
            info!(identity_id = %id, kind = self.kind.as_str(), "Password set; all tokens revoked");
        }

        self.project(identity)
    }

    async fn delete(&self, state: &AppState, id: Uuid) -> Result<(), ApiError> {
        if state.accounts().delete_identity(self.kind, id).await? {
            info!(identity_id = %id, kind = self.kind.as_str(), "Identity deleted");
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }

    fn payload_schema(&self) -> Option<&'static str> {
        Some("IdentityPayload")
    }
}
