use crate::api::state::AppState;
use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    store: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Store is reachable", body = [Health]),
        (status = 503, description = "Store is unreachable", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let result = state.accounts().ping().await;
    if let Err(err) = &result {
        error!("Store health check failed: {err}");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();

            headers.insert("X-App", x_app_header_value);

            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    // Fall back to no headers rather than failing the probe.
    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    if result.is_ok() {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::AuthConfig;
    use crate::store::{
        AccountStore, Identity, IdentityChanges, IdentityKind, ListQuery, MemoryStore,
        NewIdentity, Page, StoreError, TokenRecord,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{body::to_bytes, routing::get, Router};
    use tower::ServiceExt;
    use uuid::Uuid;

    /// Account store whose every call fails.
    struct DownStore;

    fn down() -> StoreError {
        StoreError::Backend("connection refused".to_string())
    }

    #[async_trait]
    impl AccountStore for DownStore {
        async fn insert_identity(&self, _: NewIdentity) -> Result<Identity, StoreError> {
            Err(down())
        }
        async fn identity_by_id(&self, _: Uuid) -> Result<Option<Identity>, StoreError> {
            Err(down())
        }
        async fn identity(&self, _: IdentityKind, _: Uuid) -> Result<Option<Identity>, StoreError> {
            Err(down())
        }
        async fn identity_by_username(
            &self,
            _: IdentityKind,
            _: &str,
        ) -> Result<Option<Identity>, StoreError> {
            Err(down())
        }
        async fn list_identities(
            &self,
            _: IdentityKind,
            _: &ListQuery,
        ) -> Result<Page<Identity>, StoreError> {
            Err(down())
        }
        async fn update_identity(
            &self,
            _: IdentityKind,
            _: Uuid,
            _: IdentityChanges,
        ) -> Result<Option<Identity>, StoreError> {
            Err(down())
        }
        async fn delete_identity(&self, _: IdentityKind, _: Uuid) -> Result<bool, StoreError> {
            Err(down())
        }
        async fn insert_token(&self, _: TokenRecord) -> Result<(), StoreError> {
            Err(down())
        }
        async fn token(&self, _: &[u8]) -> Result<Option<TokenRecord>, StoreError> {
            Err(down())
        }
        async fn revoke_token(&self, _: &[u8]) -> Result<bool, StoreError> {
            Err(down())
        }
        async fn rotate_credential(&self, _: Uuid, _: &str) -> Result<bool, StoreError> {
            Err(down())
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(down())
        }
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health).options(health))
            .layer(Extension(Arc::new(state)))
    }

    #[tokio::test]
    async fn healthy_store_reports_ok() -> Result<()> {
        let response = app(AppState::in_memory(AuthConfig::default()))
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(x_app.starts_with(&format!(
            "{}:{}:",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )));
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: Health = serde_json::from_slice(&body)?;
        assert_eq!(health.store, "ok");
        assert_eq!(health.name, env!("CARGO_PKG_NAME"));
        Ok(())
    }

    #[tokio::test]
    async fn options_has_empty_body() -> Result<()> {
        let response = app(AppState::in_memory(AuthConfig::default()))
            .oneshot(
                axum::http::Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() -> Result<()> {
        let memory = Arc::new(MemoryStore::new());
        let state = AppState::new(
            Arc::new(DownStore),
            memory.clone(),
            memory,
            AuthConfig::default(),
        );
        let response = app(state)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: Health = serde_json::from_slice(&body)?;
        assert_eq!(health.store, "error");
        Ok(())
    }
}
