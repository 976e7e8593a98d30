//! Postgres-backed store (sqlx). Schema lives in `sql/schema.sql`.

use super::{
    prune_cutoff, AccountStore, CaptchaChallenge, CaptchaStore, Identity, IdentityChanges,
    IdentityKind, ListQuery, NewIdentity, Ordering, Page, Record, RecordKind, RecordStore,
    StoreError, TokenRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, types::Json, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument, Instrument};
use uuid::Uuid;

const IDENTITY_COLUMNS: &str = "id, kind, username, password_hash, is_admin, is_active, \
     display_name, created_at, updated_at";
const RECORD_COLUMNS: &str = "id, kind, data, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn write_error(err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict
    } else {
        StoreError::Database(err)
    }
}

/// Escape `%`, `_` and `\` so user input is matched literally by `ILIKE`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_identity_kind(value: &str) -> Result<IdentityKind, StoreError> {
    match value {
        "staff" => Ok(IdentityKind::Staff),
        "member" => Ok(IdentityKind::Member),
        other => Err(StoreError::Backend(format!("unknown identity kind: {other}"))),
    }
}

fn parse_record_kind(value: &str) -> Result<RecordKind, StoreError> {
    match value {
        "envelope_level" => Ok(RecordKind::EnvelopeLevel),
        "envelope_setting" => Ok(RecordKind::EnvelopeSetting),
        "envelope_claim" => Ok(RecordKind::EnvelopeClaim),
        "envelope_deposit" => Ok(RecordKind::EnvelopeDeposit),
        other => Err(StoreError::Backend(format!("unknown record kind: {other}"))),
    }
}

fn identity_from_row(row: &PgRow) -> Result<Identity, StoreError> {
    Ok(Identity {
        id: row.try_get("id")?,
        kind: parse_identity_kind(row.try_get::<&str, _>("kind")?)?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        is_admin: row.try_get("is_admin")?,
        is_active: row.try_get("is_active")?,
        display_name: row.try_get("display_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<Record, StoreError> {
    let Json(data) = row.try_get::<Json<Value>, _>("data")?;
    let data = match data {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::Backend(format!(
                "record payload is not an object: {other}"
            )))
        }
    };
    Ok(Record {
        id: row.try_get("id")?,
        kind: parse_record_kind(row.try_get::<&str, _>("kind")?)?,
        data,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn token_from_row(row: &PgRow) -> Result<TokenRecord, StoreError> {
    Ok(TokenRecord {
        token_hash: row.try_get("token_hash")?,
        identity_id: row.try_get("identity_id")?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        valid: row.try_get("valid")?,
    })
}

const fn order_clause(ordering: Ordering) -> &'static str {
    match ordering {
        Ordering::CreatedAsc => " ORDER BY created_at ASC, id ASC",
        Ordering::CreatedDesc => " ORDER BY created_at DESC, id DESC",
    }
}

fn push_identity_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    kind: IdentityKind,
    query: &ListQuery,
) {
    builder.push(" WHERE kind = ");
    builder.push_bind(kind.as_str());
    if let Some(needle) = query.filter("username") {
        builder.push(" AND username ILIKE ");
        builder.push_bind(format!("%{}%", escape_like(needle)));
    }
    if let Some(active) = query
        .filter("is_active")
        .and_then(|value| value.parse::<bool>().ok())
    {
        builder.push(" AND is_active = ");
        builder.push_bind(active);
    }
}

fn push_record_filters(builder: &mut QueryBuilder<'_, Postgres>, kind: RecordKind, query: &ListQuery) {
    builder.push(" WHERE kind = ");
    builder.push_bind(kind.as_str());
    // Scalars only, matching `filter_text` in the memory backend.
    for (field, value) in &query.filters {
        builder.push(" AND jsonb_typeof(data -> ");
        builder.push_bind(field.clone());
        builder.push(") IN ('string', 'number', 'boolean') AND data ->> ");
        builder.push_bind(field.clone());
        builder.push(" = ");
        builder.push_bind(value.clone());
    }
}

fn push_pagination(builder: &mut QueryBuilder<'_, Postgres>, query: &ListQuery) {
    builder.push(order_clause(query.ordering));
    builder.push(" LIMIT ");
    builder.push_bind(i64::from(query.page_size));
    builder.push(" OFFSET ");
    builder.push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));
}

fn count_from_row(row: &PgRow) -> Result<u64, StoreError> {
    let total: i64 = row.try_get("total")?;
    Ok(u64::try_from(total).unwrap_or(0))
}

#[async_trait]
impl AccountStore for PgStore {
    #[instrument(skip(self, new), fields(kind = new.kind.as_str()))]
    async fn insert_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let query = format!(
            r"
            INSERT INTO identities (id, kind, username, password_hash, is_admin, is_active, display_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {IDENTITY_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(new.kind.as_str())
            .bind(&new.username)
            .bind(&new.password_hash)
            .bind(new.is_admin)
            .bind(new.is_active)
            .bind(&new.display_name)
            .fetch_one(&self.pool)
            .await
            .map_err(write_error)?;
        identity_from_row(&row)
    }

    async fn identity_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let query = format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn identity(
        &self,
        kind: IdentityKind,
        id: Uuid,
    ) -> Result<Option<Identity>, StoreError> {
        let query =
            format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1 AND kind = $2");
        let row = sqlx::query(&query)
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn identity_by_username(
        &self,
        kind: IdentityKind,
        username: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let query =
            format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE kind = $1 AND username = $2");
        let row = sqlx::query(&query)
            .bind(kind.as_str())
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn list_identities(
        &self,
        kind: IdentityKind,
        query: &ListQuery,
    ) -> Result<Page<Identity>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM identities");
        push_identity_filters(&mut count, kind, query);
        let total = count_from_row(&count.build().fetch_one(&self.pool).await?)?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {IDENTITY_COLUMNS} FROM identities"));
        push_identity_filters(&mut select, kind, query);
        push_pagination(&mut select, query);
        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(identity_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            count: total,
            items,
        })
    }

    #[instrument(skip(self, changes), fields(kind = kind.as_str()))]
    async fn update_identity(
        &self,
        kind: IdentityKind,
        id: Uuid,
        changes: IdentityChanges,
    ) -> Result<Option<Identity>, StoreError> {
        let query = format!(
            r"
            UPDATE identities
            SET
                username = COALESCE($1, username),
                password_hash = COALESCE($2, password_hash),
                is_admin = COALESCE($3, is_admin),
                is_active = COALESCE($4, is_active),
                display_name = COALESCE($5, display_name),
                updated_at = NOW()
            WHERE id = $6 AND kind = $7
            RETURNING {IDENTITY_COLUMNS}
            "
        );
        let rotated = changes.password_hash.is_some();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&query)
            .bind(changes.username)
            .bind(changes.password_hash)
            .bind(changes.is_admin)
            .bind(changes.is_active)
            .bind(changes.display_name)
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(write_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        if rotated {
            sqlx::query("UPDATE auth_tokens SET valid = FALSE WHERE identity_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        let identity = identity_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(identity))
    }

    async fn delete_identity(&self, kind: IdentityKind, id: Uuid) -> Result<bool, StoreError> {
        // auth_tokens rows go with it (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM identities WHERE id = $1 AND kind = $2")
            .bind(id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let pruned = sqlx::query("DELETE FROM auth_tokens WHERE NOT valid OR expires_at <= $1")
            .bind(prune_cutoff(Utc::now()))
            .execute(&mut *tx)
            .await?;
        if pruned.rows_affected() > 0 {
            debug!(pruned = pruned.rows_affected(), "Pruned dead tokens");
        }
        sqlx::query(
            r"
            INSERT INTO auth_tokens (token_hash, identity_id, issued_at, expires_at, valid)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&record.token_hash)
        .bind(record.identity_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.valid)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
        tx.commit().await?;
        Ok(())
    }

    async fn token(&self, token_hash: &[u8]) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT token_hash, identity_id, issued_at, expires_at, valid
            FROM auth_tokens
            WHERE token_hash = $1
            ",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn revoke_token(&self, token_hash: &[u8]) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE auth_tokens SET valid = FALSE WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, password_hash))]
    async fn rotate_credential(
        &self,
        identity_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent rotations of the same identity.
        let locked = sqlx::query("SELECT id FROM identities WHERE id = $1 FOR UPDATE")
            .bind(identity_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE identities SET password_hash = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(password_hash)
        .bind(identity_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE auth_tokens SET valid = FALSE WHERE identity_id = $1")
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let span = tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn list_records(
        &self,
        kind: RecordKind,
        query: &ListQuery,
    ) -> Result<Page<Record>, StoreError> {
        let mut count =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM envelope_records");
        push_record_filters(&mut count, kind, query);
        let total = count_from_row(&count.build().fetch_one(&self.pool).await?)?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {RECORD_COLUMNS} FROM envelope_records"));
        push_record_filters(&mut select, kind, query);
        push_pagination(&mut select, query);
        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            count: total,
            items,
        })
    }

    async fn record(&self, kind: RecordKind, id: Uuid) -> Result<Option<Record>, StoreError> {
        let query =
            format!("SELECT {RECORD_COLUMNS} FROM envelope_records WHERE id = $1 AND kind = $2");
        let row = sqlx::query(&query)
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self, payloads), fields(kind = kind.as_str(), count = payloads.len()))]
    async fn insert_records(
        &self,
        kind: RecordKind,
        payloads: Vec<Map<String, Value>>,
    ) -> Result<Vec<Record>, StoreError> {
        let query = format!(
            r"
            INSERT INTO envelope_records (id, kind, data)
            VALUES ($1, $2, $3)
            RETURNING {RECORD_COLUMNS}
            "
        );
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(payloads.len());
        for data in payloads {
            let row = sqlx::query(&query)
                .bind(Uuid::new_v4())
                .bind(kind.as_str())
                .bind(Json(Value::Object(data)))
                .fetch_one(&mut *tx)
                .await
                .map_err(write_error)?;
            created.push(record_from_row(&row)?);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn update_record(
        &self,
        kind: RecordKind,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<Record>, StoreError> {
        let query = format!(
            r"
            UPDATE envelope_records
            SET data = data || $1, updated_at = NOW()
            WHERE id = $2 AND kind = $3
            RETURNING {RECORD_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(Json(Value::Object(changes)))
            .bind(id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete_record(&self, kind: RecordKind, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM envelope_records WHERE id = $1 AND kind = $2")
            .bind(id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CaptchaStore for PgStore {
    async fn insert_challenge(&self, challenge: CaptchaChallenge) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM captcha_challenges WHERE expires_at <= NOW()")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO captcha_challenges (key, response, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(&challenge.key)
        .bind(&challenge.response)
        .bind(challenge.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
        tx.commit().await?;
        Ok(())
    }

    async fn take_challenge(&self, key: &str) -> Result<Option<CaptchaChallenge>, StoreError> {
        let row = sqlx::query(
            "DELETE FROM captcha_challenges WHERE key = $1 RETURNING key, response, expires_at",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            Ok(CaptchaChallenge {
                key: row.try_get("key")?,
                response: row.try_get("response")?,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
    }
}
