//! Generic CRUD over the identity and envelope collections.
//!
//! A [`ResourceView`] names a collection adapter, the gate in front of it and
//! the operations it exposes. Routes are only registered for those operations;
//! every other method on the same path answers `NOT_ALLOWED`, whoever calls.
//! Several views may share one collection (e.g. `/manage/member` and
//! `/member/member`), so storage logic exists once.

pub mod docs;
pub mod envelopes;
pub mod identities;
pub mod types;


use super::auth::{resolve_caller, AccessGate, Caller, TokenState};
use crate::api::{
    reply::{self, not_allowed, ApiError},
    state::AppState,
};
use crate::store::{
    IdentityKind, ListQuery, Ordering, Page, RecordKind, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    http::HeaderMap,
    response::Response,
    routing::{post, MethodRouter},
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use self::{envelopes::EnvelopeCollection, identities::IdentityCollection, types::ListResponse};

/// Storage adapter behind a view. Payloads and replies are JSON so one set of
/// handlers serves every collection.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn list(&self, state: &AppState, query: &ListQuery) -> Result<Page<Value>, ApiError>;

    async fn retrieve(&self, state: &AppState, id: Uuid) -> Result<Value, ApiError>;

    async fn create(&self, state: &AppState, payload: Map<String, Value>)
        -> Result<Value, ApiError>;

    /// Partial update; PUT and PATCH both merge.
    async fn update(
        &self,
        state: &AppState,
        id: Uuid,
        payload: Map<String, Value>,
    ) -> Result<Value, ApiError>;

    async fn delete(&self, state: &AppState, id: Uuid) -> Result<(), ApiError>;

    /// Component name of the create/update body, if it has a fixed shape.
    fn payload_schema(&self) -> Option<&'static str> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Operations {
    pub list: bool,
    pub retrieve: bool,
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl Operations {
    pub const FULL: Self = Self {
        list: true,
        retrieve: true,
        create: true,
        update: true,
        delete: true,
    };

    pub const READ_ONLY: Self = Self {
        list: true,
        retrieve: true,
        create: false,
        update: false,
        delete: false,
    };
}

pub struct ResourceView {
    pub path: &'static str,
    pub collection: Arc<dyn Collection>,
    pub gate: AccessGate,
    pub operations: Operations,
    pub ordering: Ordering,
}

impl ResourceView {
    #[must_use]
    pub fn new(
        path: &'static str,
        collection: impl Collection + 'static,
        gate: AccessGate,
        operations: Operations,
    ) -> Self {
        Self {
            path,
            collection: Arc::new(collection),
            gate,
            operations,
            ordering: Ordering::default(),
        }
    }

    #[must_use]
    pub fn ordered(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    /// `<path>` and `<path>/:id`, each with only the supported methods.
    fn routes(self) -> Router {
        let ops = self.operations;
        let path = self.path;

        let mut collection = MethodRouter::new().fallback(not_allowed);
        if ops.list {
            collection = collection.get(list);
        }
        if ops.create {
            collection = collection.post(create);
        }

        let mut item = MethodRouter::new().fallback(not_allowed);
        if ops.retrieve {
            item = item.get(retrieve);
        }
        if ops.update {
            item = item.put(update).patch(update);
        }
        if ops.delete {
            item = item.delete(destroy);
        }

        Router::new()
            .route(path, collection)
            .route(&format!("{path}/:id"), item)
            .layer(Extension(Arc::new(self)))
    }
}

/// Every view served by the API.
#[must_use]
pub fn views() -> Vec<ResourceView> {
    vec![
        ResourceView::new(
            "/manage/staff",
            IdentityCollection::admin(IdentityKind::Staff),
            AccessGate::STAFF_OR_ADMIN,
            Operations::FULL,
        ),
        ResourceView::new(
            "/manage/member",
            IdentityCollection::admin(IdentityKind::Member),
            AccessGate::STAFF_OR_ADMIN,
            Operations::FULL,
        )
        .ordered(Ordering::CreatedDesc),
        ResourceView::new(
            "/member/member",
            IdentityCollection::public(IdentityKind::Member),
            AccessGate::UNRESTRICTED,
            Operations::READ_ONLY,
        ),
        ResourceView::new(
            "/manage/envelopelevel",
            EnvelopeCollection::new(RecordKind::EnvelopeLevel),
            AccessGate::STAFF_OR_ADMIN,
            Operations::FULL,
        ),
        ResourceView::new(
            "/manage/envelopesetting",
            EnvelopeCollection::new(RecordKind::EnvelopeSetting),
            AccessGate::STAFF_OR_ADMIN,
            Operations::FULL,
        ),
        ResourceView::new(
            "/manage/envelopeclaim",
            EnvelopeCollection::new(RecordKind::EnvelopeClaim),
            AccessGate::STAFF_OR_ADMIN,
            Operations::FULL,
        ),
        ResourceView::new(
            "/manage/envelopedeposit",
            EnvelopeCollection::new(RecordKind::EnvelopeDeposit),
            AccessGate::STAFF_OR_ADMIN,
            Operations::FULL,
        ),
        ResourceView::new(
            "/member/envelopeclaim",
            EnvelopeCollection::new(RecordKind::EnvelopeClaim),
            AccessGate::UNRESTRICTED,
            Operations::READ_ONLY,
        ),
        ResourceView::new(
            "/member/envelopelevel",
            EnvelopeCollection::new(RecordKind::EnvelopeLevel),
            AccessGate::UNRESTRICTED,
            Operations::READ_ONLY,
        ),
    ]
}

pub fn router() -> Router {
    views()
        .into_iter()
        .fold(Router::new(), |router, view| router.merge(view.routes()))
        .route(
            "/manage/envelope/import",
            post(envelopes::import).fallback(not_allowed),
        )
}

/// Resolve the caller and run it through `gate`.
///
/// Gated views also refuse expired tokens; unrestricted ones serve the caller
/// as whatever role it resolved to.
///
/// # Errors
/// Returns `Unauthorized`/`Forbidden` on denial.
pub(crate) async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    gate: AccessGate,
) -> Result<Caller, ApiError> {
    let caller = resolve_caller(headers, state.accounts()).await?;
    if !gate.is_unrestricted() && caller.token == TokenState::Expired {
        return Err(ApiError::Unauthorized);
    }
    gate.check(&caller)?;
    Ok(caller)
}

fn parse_positive(name: &str, value: &str) -> Result<u32, ApiError> {
    value
        .parse::<u32>()
        .ok()
        .filter(|parsed| *parsed > 0)
        .ok_or_else(|| ApiError::Validation(format!("{name} must be a positive integer")))
}

/// `page` and `page_size` drive pagination; every other key is a filter.
pub(crate) fn parse_list_query(
    params: Vec<(String, String)>,
    ordering: Ordering,
) -> Result<ListQuery, ApiError> {
    let mut query = ListQuery {
        page: 1,
        page_size: DEFAULT_PAGE_SIZE,
        ordering,
        filters: Vec::new(),
    };
    for (key, value) in params {
        if key == "page" {
            query.page = parse_positive(&key, &value)?;
        } else if key == "page_size" {
            query.page_size = parse_positive(&key, &value)?.min(MAX_PAGE_SIZE);
        } else {
            query.filters.push((key, value));
        }
    }
    Ok(query)
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

fn object_payload(
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Map<String, Value>, ApiError> {
    match reply::json_body(payload)? {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::Validation(
            "Request body must be a JSON object".to_string(),
        )),
    }
}

/// Serialize a projection for the generic handlers.
pub(crate) fn to_json<T: Serialize>(value: T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|err| ApiError::Internal(format!("failed to serialize resource: {err}")))
}

async fn list(
    view: Extension<Arc<ResourceView>>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, view.gate).await?;
    let query = parse_list_query(params, view.ordering)?;
    let page = view.collection.list(&state, &query).await?;
    debug!(path = view.path, count = page.count, "Listed resources");
    reply::ok(&ListResponse {
        count: page.count,
        page: query.page,
        page_size: query.page_size,
        results: page.items,
    })
}

async fn retrieve(
    view: Extension<Arc<ResourceView>>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, view.gate).await?;
    let id = parse_id(&id)?;
    let item = view.collection.retrieve(&state, id).await?;
    reply::ok(&item)
}

async fn create(
    view: Extension<Arc<ResourceView>>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, view.gate).await?;
    let payload = object_payload(payload)?;
    let item = view.collection.create(&state, payload).await?;
    reply::created(&item)
}

async fn update(
    view: Extension<Arc<ResourceView>>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, view.gate).await?;
    let id = parse_id(&id)?;
    let payload = object_payload(payload)?;
    let item = view.collection.update(&state, id, payload).await?;
    reply::ok(&item)
}

async fn destroy(
    view: Extension<Arc<ResourceView>>,
    state: Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, view.gate).await?;
    let id = parse_id(&id)?;
    view.collection.delete(&state, id).await?;
    Ok(reply::ack())
}
