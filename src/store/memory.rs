//! In-process store used by tests and by runs without `--dsn`.
//!
//! Everything lives behind one `RwLock`, so each trait method is atomic with
//! respect to every other one. Data is lost on restart.

use super::{
    filter_text, AccountStore, CaptchaChallenge, CaptchaStore, Identity, IdentityChanges,
    IdentityKind, ListQuery, NewIdentity, Ordering, Page, Record, RecordKind, RecordStore,
    StoreError, TokenRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    identities: HashMap<Uuid, Identity>,
    tokens: HashMap<Vec<u8>, TokenRecord>,
    records: HashMap<Uuid, Record>,
    captchas: HashMap<String, CaptchaChallenge>,
}

impl Inner {
    fn username_taken(&self, kind: IdentityKind, username: &str, except: Option<Uuid>) -> bool {
        self.identities.values().any(|identity| {
            identity.kind == kind
                && identity.username == username
                && Some(identity.id) != except
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Sort by creation time (id breaks ties) then cut out the requested page.
fn paginate<T: Clone>(
    mut rows: Vec<T>,
    query: &ListQuery,
    created: impl Fn(&T) -> (chrono::DateTime<Utc>, Uuid),
) -> Page<T> {
    rows.sort_by_key(|row| created(row));
    if query.ordering == Ordering::CreatedDesc {
        rows.reverse();
    }
    let count = rows.len() as u64;
    let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
    let items = rows
        .into_iter()
        .skip(offset)
        .take(query.page_size as usize)
        .collect();
    Page { count, items }
}

fn identity_matches(identity: &Identity, query: &ListQuery) -> bool {
    if let Some(needle) = query.filter("username") {
        if !identity
            .username
            .to_lowercase()
            .contains(&needle.to_lowercase())
        {
            return false;
        }
    }
    // Unparseable values are ignored, as in the Postgres backend.
    if let Some(active) = query
        .filter("is_active")
        .and_then(|value| value.parse::<bool>().ok())
    {
        if identity.is_active != active {
            return false;
        }
    }
    true
}

fn revoke_all(tokens: &mut HashMap<Vec<u8>, TokenRecord>, identity_id: Uuid) {
    for token in tokens.values_mut() {
        if token.identity_id == identity_id {
            token.valid = false;
        }
    }
}

fn record_matches(record: &Record, query: &ListQuery) -> bool {
    query.filters.iter().all(|(field, expected)| {
        record
            .data
            .get(field)
            .and_then(filter_text)
            .is_some_and(|text| text == *expected)
    })
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.username_taken(new.kind, &new.username, None) {
            return Err(StoreError::Conflict);
        }
        let now = Utc::now();
        let identity = Identity {
            id: Uuid::new_v4(),
            kind: new.kind,
            username: new.username,
            password_hash: new.password_hash,
            is_admin: new.is_admin,
            is_active: new.is_active,
            display_name: new.display_name,
            created_at: now,
            updated_at: now,
        };
        inner.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.inner.read().await.identities.get(&id).cloned())
    }

    async fn identity(
        &self,
        kind: IdentityKind,
        id: Uuid,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .identities
            .get(&id)
            .filter(|identity| identity.kind == kind)
            .cloned())
    }

    async fn identity_by_username(
        &self,
        kind: IdentityKind,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .identities
            .values()
            .find(|identity| identity.kind == kind && identity.username == username)
            .cloned())
    }

    async fn list_identities(
        &self,
        kind: IdentityKind,
        query: &ListQuery,
    ) -> Result<Page<Identity>, StoreError> {
        let inner = self.inner.read().await;
        let rows = inner
            .identities
            .values()
            .filter(|identity| identity.kind == kind && identity_matches(identity, query))
            .cloned()
            .collect();
        Ok(paginate(rows, query, |identity| {
            (identity.created_at, identity.id)
        }))
    }

    async fn update_identity(
        &self,
        kind: IdentityKind,
        id: Uuid,
        changes: IdentityChanges,
    ) -> Result<Option<Identity>, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(username) = changes.username.as_deref() {
            if inner.username_taken(kind, username, Some(id)) {
                return Err(StoreError::Conflict);
            }
        }
        let Some(identity) = inner
            .identities
            .get_mut(&id)
            .filter(|identity| identity.kind == kind)
        else {
            return Ok(None);
        };
        if let Some(username) = changes.username {
            identity.username = username;
        }
        let rotated = changes.password_hash.is_some();
        if let Some(password_hash) = changes.password_hash {
            identity.password_hash = password_hash;
        }
        if let Some(is_admin) = changes.is_admin {
            identity.is_admin = is_admin;
        }
        if let Some(is_active) = changes.is_active {
            identity.is_active = is_active;
        }
        if let Some(display_name) = changes.display_name {
            identity.display_name = Some(display_name);
        }
        identity.updated_at = Utc::now();
        let updated = identity.clone();
        if rotated {
            revoke_all(&mut inner.tokens, id);
        }
        Ok(Some(updated))
    }

    async fn delete_identity(&self, kind: IdentityKind, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .identities
            .get(&id)
            .is_some_and(|identity| identity.kind == kind);
        if !exists {
            return Ok(false);
        }
        inner.identities.remove(&id);
        inner.tokens.retain(|_, token| token.identity_id != id);
        Ok(true)
    }

    async fn insert_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        inner.tokens.retain(|_, token| !token.is_prunable(now));
        if inner.tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict);
        }
        inner.tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn token(&self, token_hash: &[u8]) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.inner.read().await.tokens.get(token_hash).cloned())
    }

    async fn revoke_token(&self, token_hash: &[u8]) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .tokens
            .get_mut(token_hash)
            .map(|token| token.valid = false)
            .is_some())
    }

    async fn rotate_credential(
        &self,
        identity_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        // Single write guard: the hash change and the revocations become
        // visible together.
        let mut inner = self.inner.write().await;
        let Some(identity) = inner.identities.get_mut(&identity_id) else {
            return Ok(false);
        };
        identity.password_hash = password_hash.to_string();
        identity.updated_at = Utc::now();
        revoke_all(&mut inner.tokens, identity_id);
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_records(
        &self,
        kind: RecordKind,
        query: &ListQuery,
    ) -> Result<Page<Record>, StoreError> {
        let inner = self.inner.read().await;
        let rows = inner
            .records
            .values()
            .filter(|record| record.kind == kind && record_matches(record, query))
            .cloned()
            .collect();
        Ok(paginate(rows, query, |record| (record.created_at, record.id)))
    }

    async fn record(&self, kind: RecordKind, id: Uuid) -> Result<Option<Record>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .get(&id)
            .filter(|record| record.kind == kind)
            .cloned())
    }

    async fn insert_records(
        &self,
        kind: RecordKind,
        payloads: Vec<Map<String, Value>>,
    ) -> Result<Vec<Record>, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let created: Vec<Record> = payloads
            .into_iter()
            .map(|data| Record {
                id: Uuid::new_v4(),
                kind,
                data,
                created_at: now,
                updated_at: now,
            })
            .collect();
        for record in &created {
            inner.records.insert(record.id, record.clone());
        }
        Ok(created)
    }

    async fn update_record(
        &self,
        kind: RecordKind,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner
            .records
            .get_mut(&id)
            .filter(|record| record.kind == kind)
        else {
            return Ok(None);
        };
        record.data.extend(changes);
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn delete_record(&self, kind: RecordKind, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let exists = inner
            .records
            .get(&id)
            .is_some_and(|record| record.kind == kind);
        if exists {
            inner.records.remove(&id);
        }
        Ok(exists)
    }
}

#[async_trait]
impl CaptchaStore for MemoryStore {
    async fn insert_challenge(&self, challenge: CaptchaChallenge) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        // Expired challenges are never taken; drop them while we hold the lock.
        inner
            .captchas
            .retain(|_, existing| existing.expires_at > now);
        inner.captchas.insert(challenge.key.clone(), challenge);
        Ok(())
    }

    async fn take_challenge(&self, key: &str) -> Result<Option<CaptchaChallenge>, StoreError> {
        Ok(self.inner.write().await.captchas.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use chrono::Duration;
    use serde_json::json;

    fn new_identity(kind: IdentityKind, username: &str) -> NewIdentity {
        NewIdentity {
            kind,
            username: username.to_string(),
            password_hash: "hash".to_string(),
            is_admin: false,
            is_active: true,
            display_name: None,
        }
    }

    fn token_for(identity_id: Uuid, hash: &[u8]) -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            token_hash: hash.to_vec(),
            identity_id,
            issued_at: now,
            expires_at: now + Duration::hours(1),
            valid: true,
        }
    }

    #[tokio::test]
    async fn usernames_are_unique_per_kind() -> Result<()> {
        let store = MemoryStore::new();
        store
            .insert_identity(new_identity(IdentityKind::Staff, "alice"))
            .await?;
        // Same name in the other collection is fine.
        store
            .insert_identity(new_identity(IdentityKind::Member, "alice"))
            .await?;
        let duplicate = store
            .insert_identity(new_identity(IdentityKind::Staff, "alice"))
            .await;
        assert!(matches!(duplicate, Err(StoreError::Conflict)));
        Ok(())
    }

    #[tokio::test]
    async fn rename_to_taken_username_conflicts() -> Result<()> {
        let store = MemoryStore::new();
        store
            .insert_identity(new_identity(IdentityKind::Member, "alice"))
            .await?;
        let bob = store
            .insert_identity(new_identity(IdentityKind::Member, "bob"))
            .await?;
        let changes = IdentityChanges {
            username: Some("alice".to_string()),
            ..IdentityChanges::default()
        };
        let result = store
            .update_identity(IdentityKind::Member, bob.id, changes)
            .await;
        assert!(matches!(result, Err(StoreError::Conflict)));
        Ok(())
    }

    #[tokio::test]
    async fn identity_lookup_respects_kind() -> Result<()> {
        let store = MemoryStore::new();
        let staff = store
            .insert_identity(new_identity(IdentityKind::Staff, "carol"))
            .await?;
        assert!(store
            .identity(IdentityKind::Member, staff.id)
            .await?
            .is_none());
        assert!(store.identity(IdentityKind::Staff, staff.id).await?.is_some());
        assert!(store.identity_by_id(staff.id).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn list_identities_filters_orders_and_paginates() -> Result<()> {
        let store = MemoryStore::new();
        for name in ["ann", "anna", "bob", "joanne"] {
            store
                .insert_identity(new_identity(IdentityKind::Member, name))
                .await?;
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let query = ListQuery {
            page: 1,
            page_size: 2,
            ordering: Ordering::CreatedDesc,
            filters: vec![("username".to_string(), "ANN".to_string())],
        };
        let page = store.list_identities(IdentityKind::Member, &query).await?;
        assert_eq!(page.count, 3);
        let names: Vec<_> = page.items.iter().map(|i| i.username.as_str()).collect();
        assert_eq!(names, vec!["joanne", "anna"]);
        Ok(())
    }

    #[tokio::test]
    async fn rotate_credential_revokes_every_token() -> Result<()> {
        let store = MemoryStore::new();
        let staff = store
            .insert_identity(new_identity(IdentityKind::Staff, "dave"))
            .await?;
        let other = store
            .insert_identity(new_identity(IdentityKind::Staff, "erin"))
            .await?;
        store.insert_token(token_for(staff.id, b"one")).await?;
        store.insert_token(token_for(staff.id, b"two")).await?;
        store.insert_token(token_for(other.id, b"three")).await?;

        assert!(store.rotate_credential(staff.id, "new-hash").await?);

        let one = store.token(b"one").await?.context("token one")?;
        let two = store.token(b"two").await?.context("token two")?;
        let three = store.token(b"three").await?.context("token three")?;
        assert!(!one.valid);
        assert!(!two.valid);
        assert!(three.valid);
        let stored = store.identity_by_id(staff.id).await?.context("staff")?;
        assert_eq!(stored.password_hash, "new-hash");
        Ok(())
    }

    #[tokio::test]
    async fn password_update_revokes_tokens_with_the_field_changes() -> Result<()> {
        let store = MemoryStore::new();
        let member = store
            .insert_identity(new_identity(IdentityKind::Member, "gina"))
            .await?;
        store.insert_token(token_for(member.id, b"gina")).await?;

        // Field-only updates leave tokens alone.
        let rename = IdentityChanges {
            display_name: Some("Gina".to_string()),
            ..IdentityChanges::default()
        };
        store
            .update_identity(IdentityKind::Member, member.id, rename)
            .await?;
        assert!(store.token(b"gina").await?.context("token")?.valid);

        let changes = IdentityChanges {
            username: Some("gina2".to_string()),
            password_hash: Some("new-hash".to_string()),
            ..IdentityChanges::default()
        };
        let updated = store
            .update_identity(IdentityKind::Member, member.id, changes)
            .await?
            .context("updated member")?;
        assert_eq!(updated.username, "gina2");
        assert_eq!(updated.password_hash, "new-hash");
        assert!(!store.token(b"gina").await?.context("token")?.valid);
        Ok(())
    }

    #[tokio::test]
    async fn rotate_credential_unknown_identity() -> Result<()> {
        let store = MemoryStore::new();
        assert!(!store.rotate_credential(Uuid::new_v4(), "hash").await?);
        Ok(())
    }

    #[tokio::test]
    async fn insert_token_prunes_dead_tokens() -> Result<()> {
        let store = MemoryStore::new();
        let staff = store
            .insert_identity(new_identity(IdentityKind::Staff, "hank"))
            .await?;
        let now = Utc::now();
        let mut stale = token_for(staff.id, b"stale");
        stale.expires_at = now - Duration::days(2);
        let mut recent = token_for(staff.id, b"recent");
        recent.expires_at = now - Duration::minutes(1);
        store.insert_token(stale).await?;
        store.insert_token(recent).await?;
        store.insert_token(token_for(staff.id, b"live")).await?;
        assert!(store.revoke_token(b"live").await?);

        store.insert_token(token_for(staff.id, b"next")).await?;
        assert!(store.token(b"stale").await?.is_none());
        assert!(store.token(b"live").await?.is_none());
        assert!(store.token(b"recent").await?.is_some());
        assert!(store.token(b"next").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn delete_identity_drops_tokens() -> Result<()> {
        let store = MemoryStore::new();
        let member = store
            .insert_identity(new_identity(IdentityKind::Member, "frank"))
            .await?;
        store.insert_token(token_for(member.id, b"frank")).await?;
        assert!(store.delete_identity(IdentityKind::Member, member.id).await?);
        assert!(store.token(b"frank").await?.is_none());
        assert!(!store.delete_identity(IdentityKind::Member, member.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn records_merge_and_filter() -> Result<()> {
        let store = MemoryStore::new();
        let mut payload = Map::new();
        payload.insert("member".to_string(), json!("alice"));
        payload.insert("amount".to_string(), json!(10));
        let created = store
            .insert_records(RecordKind::EnvelopeClaim, vec![payload])
            .await?;
        let id = created.first().context("created record")?.id;

        let mut changes = Map::new();
        changes.insert("amount".to_string(), json!(25));
        let updated = store
            .update_record(RecordKind::EnvelopeClaim, id, changes)
            .await?
            .context("updated record")?;
        assert_eq!(updated.data.get("member"), Some(&json!("alice")));
        assert_eq!(updated.data.get("amount"), Some(&json!(25)));

        let query = ListQuery {
            filters: vec![("amount".to_string(), "25".to_string())],
            ..ListQuery::default()
        };
        let page = store
            .list_records(RecordKind::EnvelopeClaim, &query)
            .await?;
        assert_eq!(page.count, 1);
        // Other kinds never see the record.
        assert!(store
            .record(RecordKind::EnvelopeLevel, id)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn null_fields_never_match_a_filter() -> Result<()> {
        let store = MemoryStore::new();
        let mut payload = Map::new();
        payload.insert("note".to_string(), Value::Null);
        payload.insert("tags".to_string(), json!(["a"]));
        store
            .insert_records(RecordKind::EnvelopeSetting, vec![payload])
            .await?;

        for (field, value) in [("note", "null"), ("tags", "[\"a\"]")] {
            let query = ListQuery {
                filters: vec![(field.to_string(), value.to_string())],
                ..ListQuery::default()
            };
            let page = store
                .list_records(RecordKind::EnvelopeSetting, &query)
                .await?;
            assert_eq!(page.count, 0, "{field}={value}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn captcha_challenges_are_taken_once() -> Result<()> {
        let store = MemoryStore::new();
        store
            .insert_challenge(CaptchaChallenge {
                key: "key".to_string(),
                response: "ABCD".to_string(),
                expires_at: Utc::now() + Duration::minutes(5),
            })
            .await?;
        assert!(store.take_challenge("key").await?.is_some());
        assert!(store.take_challenge("key").await?.is_none());
        Ok(())
    }
}
