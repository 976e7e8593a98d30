use crate::store::{Identity, Record};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identity as seen through the `/manage/...` views.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IdentityView {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Identity> for IdentityView {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
            display_name: identity.display_name,
            is_admin: identity.is_admin,
            is_active: identity.is_active,
            created_at: identity.created_at,
            updated_at: identity.updated_at,
        }
    }
}

/// Identity as seen through the read-only `/member/...` view.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PublicIdentity {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
}

impl From<Identity> for PublicIdentity {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
            display_name: identity.display_name,
        }
    }
}

/// Create/update body for identities. Unknown fields are rejected so
/// `password_hash` or `id` can never be written directly.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct IdentityPayload {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub is_admin: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RecordView {
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Record> for RecordView {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            data: record.data,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListResponse {
    pub count: u64,
    pub page: u32,
    pub page_size: u32,
    #[schema(value_type = Vec<Object>)]
    pub results: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportResponse {
    pub imported: usize,
}
