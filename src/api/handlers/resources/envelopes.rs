//! Envelope level, setting, claim and deposit collections, plus bulk import.

use super::{
    authorize, to_json,
    types::{ImportResponse, RecordView},
    Collection,
};
use crate::api::{
    handlers::auth::AccessGate,
    reply::{self, ApiError},
    state::AppState,
};
use crate::store::{ListQuery, Page, RecordKind};
use async_trait::async_trait;
use axum::{body::Bytes, extract::Extension, http::HeaderMap, response::Response};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct EnvelopeCollection {
    kind: RecordKind,
}

impl EnvelopeCollection {
    #[must_use]
    pub const fn new(kind: RecordKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Collection for EnvelopeCollection {
    async fn list(&self, state: &AppState, query: &ListQuery) -> Result<Page<Value>, ApiError> {
        let page = state.records().list_records(self.kind, query).await?;
        let items = page
            .items
            .into_iter()
            .map(|record| to_json(RecordView::from(record)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            count: page.count,
            items,
        })
    }

    async fn retrieve(&self, state: &AppState, id: Uuid) -> Result<Value, ApiError> {
        let record = state
            .records()
            .record(self.kind, id)
            .await?
            .ok_or(ApiError::NotFound)?;
        to_json(RecordView::from(record))
    }

    async fn create(
        &self,
        state: &AppState,
        payload: Map<String, Value>,
    ) -> Result<Value, ApiError> {
        let record = state
            .records()
            .insert_records(self.kind, vec![payload])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("store returned no record".to_string()))?;
        to_json(RecordView::from(record))
    }

    async fn update(
        &self,
        state: &AppState,
        id: Uuid,
        payload: Map<String, Value>,
    ) -> Result<Value, ApiError> {
        let record = state
            .records()
            .update_record(self.kind, id, payload)
            .await?
            .ok_or(ApiError::NotFound)?;
        to_json(RecordView::from(record))
    }

    async fn delete(&self, state: &AppState, id: Uuid) -> Result<(), ApiError> {
        if state.records().delete_record(self.kind, id).await? {
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }
}

/// One JSON object per line; blank lines are skipped. Lines are 1-based in
/// error messages.
fn parse_ndjson(body: &str) -> Result<Vec<Map<String, Value>>, ApiError> {
    let mut payloads = Vec::new();
    for (index, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => payloads.push(map),
            _ => {
                return Err(ApiError::field(format!(
                    "Line {}: expected a JSON object",
                    index + 1
                )))
            }
        }
    }
    if payloads.is_empty() {
        return Err(ApiError::field("Import file is empty"));
    }
    Ok(payloads)
}

/// Bulk-create envelope deposits from newline-delimited JSON. All lines are
/// stored or none.
#[utoipa::path(
    post,
    path = "/manage/envelope/import",
    request_body(content = String, content_type = "application/x-ndjson"),
    responses(
        (status = 201, description = "Deposits imported", body = crate::api::reply::Reply),
        (status = 400, description = "Malformed line or empty file", body = crate::api::reply::Reply),
        (status = 403, description = "Caller is neither staff nor admin", body = crate::api::reply::Reply)
    ),
    security(("bearer" = [])),
    tag = "envelopes"
)]
#[instrument(skip_all)]
pub async fn import(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, AccessGate::STAFF_OR_ADMIN).await?;

    let body = std::str::from_utf8(&body)
        .map_err(|_| ApiError::field("Import file must be UTF-8 text"))?;
    let payloads = parse_ndjson(body)?;
    let created = state
        .records()
        .insert_records(RecordKind::EnvelopeDeposit, payloads)
        .await?;

    info!(count = created.len(), "Imported envelope deposits");
    reply::created(&ImportResponse {
        imported: created.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ndjson_skips_blank_lines() {
        let body = "{\"member\":\"alice\",\"amount\":10}\n\n  {\"member\":\"bob\"}  \n";
        let payloads = parse_ndjson(body);
        assert!(payloads.is_ok());
        if let Ok(payloads) = payloads {
            assert_eq!(payloads.len(), 2);
            assert_eq!(payloads[0].get("amount"), Some(&json!(10)));
        }
    }

    #[test]
    fn ndjson_names_the_bad_line() {
        let body = "{\"a\":1}\n[1,2]\n{\"b\":2}";
        match parse_ndjson(body) {
            Err(ApiError::FieldError(message)) => assert_eq!(message, "Line 2: expected a JSON object"),
            other => panic!("unexpected result: {other:?}"),
        }
        match parse_ndjson("{\"a\":1}\n{oops") {
            Err(ApiError::FieldError(message)) => assert!(message.starts_with("Line 2")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn ndjson_rejects_empty_files() {
        assert!(matches!(parse_ndjson("\n \n"), Err(ApiError::FieldError(_))));
    }
}
