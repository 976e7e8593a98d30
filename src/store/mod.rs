//! Persistence interfaces for identities, tokens, envelope records and captcha
//! challenges.
//!
//! Handlers only talk to the traits in this module. Two backends exist:
//! [`MemoryStore`] (single process, used by tests and `--dsn`-less runs) and
//! [`PgStore`] (Postgres via sqlx, schema in `sql/schema.sql`).
//!
//! Invariants every backend upholds:
//! - usernames are unique per [`IdentityKind`];
//! - only token hashes are stored, never raw tokens;
//! - [`AccountStore::rotate_credential`] and a password-changing
//!   [`AccountStore::update_identity`] write the new hash and invalidate every
//!   token of the identity atomically.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

/// How long an expired token is kept, so a late request is still answered as
/// an expired session rather than an unknown token.
pub const EXPIRED_TOKEN_RETENTION_HOURS: i64 = 24;

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (e.g. duplicate username).
    #[error("record conflicts with an existing one")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// The two identity collections. Structurally alike, stored apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Staff,
    Member,
}

impl IdentityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Member => "member",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Identity {
    pub id: Uuid,
    pub kind: IdentityKind,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewIdentity {
    pub kind: IdentityKind,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub display_name: Option<String>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Clone, Debug, Default)]
pub struct IdentityChanges {
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    pub display_name: Option<String>,
}

impl IdentityChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password_hash.is_none()
            && self.is_admin.is_none()
            && self.is_active.is_none()
            && self.display_name.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct TokenRecord {
    pub token_hash: Vec<u8>,
    pub identity_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Cleared on logout and on credential rotation.
    pub valid: bool,
}

impl TokenRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Revoked tokens, and tokens expired for longer than the retention
    /// window, behave exactly like unknown ones and can be dropped.
    #[must_use]
    pub fn is_prunable(&self, now: DateTime<Utc>) -> bool {
        !self.valid || self.expires_at <= prune_cutoff(now)
    }
}

/// Tokens that expired at or before this instant are pruned.
#[must_use]
pub fn prune_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - chrono::Duration::hours(EXPIRED_TOKEN_RETENTION_HOURS)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    EnvelopeLevel,
    EnvelopeSetting,
    EnvelopeClaim,
    EnvelopeDeposit,
}

impl RecordKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EnvelopeLevel => "envelope_level",
            Self::EnvelopeSetting => "envelope_setting",
            Self::EnvelopeClaim => "envelope_claim",
            Self::EnvelopeDeposit => "envelope_deposit",
        }
    }
}

/// Envelope-family record. The payload is opaque to this service.
#[derive(Clone, Debug)]
pub struct Record {
    pub id: Uuid,
    pub kind: RecordKind,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct CaptchaChallenge {
    pub key: String,
    pub response: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ordering {
    #[default]
    CreatedAsc,
    CreatedDesc,
}

/// Filter, ordering and pagination applied by `list` operations, in that order.
#[derive(Clone, Debug)]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub ordering: Ordering,
    pub filters: Vec<(String, String)>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            ordering: Ordering::default(),
            filters: Vec::new(),
        }
    }
}

impl ListQuery {
    /// Rows to skip for the requested page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    #[must_use]
    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Page<T> {
    /// Matches before pagination.
    pub count: u64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

/// Identities and their bearer tokens.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert_identity(&self, new: NewIdentity) -> Result<Identity, StoreError>;

    /// Lookup across both kinds, used to resolve token owners.
    async fn identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    async fn identity(&self, kind: IdentityKind, id: Uuid)
        -> Result<Option<Identity>, StoreError>;

    async fn identity_by_username(
        &self,
        kind: IdentityKind,
        username: &str,
    ) -> Result<Option<Identity>, StoreError>;

    /// Supported filters: `username` (case-insensitive substring), `is_active`.
    async fn list_identities(
        &self,
        kind: IdentityKind,
        query: &ListQuery,
    ) -> Result<Page<Identity>, StoreError>;

    /// Applies `changes` in one atomic unit. When `password_hash` is set this
    /// is a credential rotation: every token of the identity is invalidated
    /// together with the field changes.
    async fn update_identity(
        &self,
        kind: IdentityKind,
        id: Uuid,
        changes: IdentityChanges,
    ) -> Result<Option<Identity>, StoreError>;

    /// Deletes the identity and every token it owns.
    async fn delete_identity(&self, kind: IdentityKind, id: Uuid) -> Result<bool, StoreError>;

    /// Stores a new token and prunes the ones [`TokenRecord::is_prunable`]
    /// selects.
    async fn insert_token(&self, record: TokenRecord) -> Result<(), StoreError>;

    async fn token(&self, token_hash: &[u8]) -> Result<Option<TokenRecord>, StoreError>;

    /// Marks one token invalid. Returns false if it was unknown.
    async fn revoke_token(&self, token_hash: &[u8]) -> Result<bool, StoreError>;

    /// Store the new credential and invalidate all tokens of the identity as
    /// one atomic unit. Returns false if the identity does not exist.
    async fn rotate_credential(
        &self,
        identity_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError>;

    /// Cheap liveness probe for `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Envelope-family records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every filter is an equality match on a top-level scalar field of
    /// `data` (see [`filter_text`]).
    async fn list_records(
        &self,
        kind: RecordKind,
        query: &ListQuery,
    ) -> Result<Page<Record>, StoreError>;

    async fn record(&self, kind: RecordKind, id: Uuid) -> Result<Option<Record>, StoreError>;

    /// Inserts all payloads or none.
    async fn insert_records(
        &self,
        kind: RecordKind,
        payloads: Vec<Map<String, Value>>,
    ) -> Result<Vec<Record>, StoreError>;

    /// Merges `changes` into the stored payload (top-level keys).
    async fn update_record(
        &self,
        kind: RecordKind,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError>;

    async fn delete_record(&self, kind: RecordKind, id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CaptchaStore: Send + Sync {
    async fn insert_challenge(&self, challenge: CaptchaChallenge) -> Result<(), StoreError>;

    /// Removes and returns the challenge; a key can be taken at most once.
    async fn take_challenge(&self, key: &str) -> Result<Option<CaptchaChallenge>, StoreError>;
}

/// Render a JSON value the way filters compare it: strings unquoted, numbers
/// and booleans as JSON text. `null`, arrays and objects never match a filter,
/// which is what Postgres' `->>` gives for them too.
#[must_use]
pub fn filter_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_query_offset_uses_page_size() {
        let query = ListQuery {
            page: 3,
            page_size: 10,
            ..ListQuery::default()
        };
        assert_eq!(query.offset(), 20);
        assert_eq!(ListQuery::default().offset(), 0);
    }

    #[test]
    fn list_query_filter_finds_first_match() {
        let query = ListQuery {
            filters: vec![
                ("member".to_string(), "alice".to_string()),
                ("status".to_string(), "open".to_string()),
            ],
            ..ListQuery::default()
        };
        assert_eq!(query.filter("status"), Some("open"));
        assert_eq!(query.filter("missing"), None);
    }

    #[test]
    fn filter_text_unquotes_strings() {
        assert_eq!(filter_text(&json!("open")).as_deref(), Some("open"));
        assert_eq!(filter_text(&json!(42)).as_deref(), Some("42"));
        assert_eq!(filter_text(&json!(true)).as_deref(), Some("true"));
    }

    #[test]
    fn filter_text_skips_null_and_containers() {
        assert_eq!(filter_text(&Value::Null), None);
        assert_eq!(filter_text(&json!([1, 2])), None);
        assert_eq!(filter_text(&json!({"a": 1})), None);
    }

    #[test]
    fn prunable_tokens() {
        let now = Utc::now();
        let token = |expires_at, valid| TokenRecord {
            token_hash: vec![1],
            identity_id: Uuid::new_v4(),
            issued_at: now,
            expires_at,
            valid,
        };
        assert!(!token(now + chrono::Duration::hours(1), true).is_prunable(now));
        // Recently expired tokens are kept.
        assert!(!token(now - chrono::Duration::minutes(5), true).is_prunable(now));
        assert!(token(now - chrono::Duration::hours(25), true).is_prunable(now));
        assert!(token(now + chrono::Duration::hours(1), false).is_prunable(now));
    }

    #[test]
    fn identity_changes_empty_detection() {
        assert!(IdentityChanges::default().is_empty());
        let changes = IdentityChanges {
            is_active: Some(false),
            ..IdentityChanges::default()
        };
        assert!(!changes.is_empty());
    }
}
