use super::{principal::resolve_caller, types::CurrentUserResponse};
use crate::api::{
    reply::{self, ApiError},
    state::AppState,
};
use axum::{extract::Extension, http::HeaderMap, response::Response};
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/current_user",
    responses(
        (status = 200, description = "Identity behind the bearer token", body = crate::api::reply::Reply),
        (status = 404, description = "No resolvable identity", body = crate::api::reply::Reply)
    ),
    security((), ("bearer" = [])),
    tag = "auth"
)]
pub async fn current_user(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let caller = resolve_caller(&headers, state.accounts()).await?;
    let identity = caller.active_identity().ok_or(ApiError::NotFound)?;
    reply::ok(&CurrentUserResponse {
        username: identity.username.clone(),
        kind: caller.role.as_str().to_string(),
    })
}
