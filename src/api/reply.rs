//! Uniform reply envelope.
//!
//! Every endpoint answers `{"status": ..., "message"?: ..., "data"?: ...}`.
//! Failures are converted into the envelope at the boundary of the operation
//! that detects them via [`ApiError`]'s `IntoResponse` impl.

use crate::store::StoreError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    AllOk,
    FieldError,
    NotAllowed,
    NotOk,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Reply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    #[must_use]
    pub const fn new(status: ReplyStatus) -> Self {
        Self {
            status,
            message: None,
            data: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// `200 ALL_OK` carrying `data`.
///
/// # Errors
/// Returns [`ApiError::Internal`] if `data` cannot be serialized.
pub fn ok<T: Serialize>(data: &T) -> Result<Response, ApiError> {
    respond(StatusCode::OK, data)
}

/// `201 ALL_OK` carrying the created resource.
///
/// # Errors
/// Returns [`ApiError::Internal`] if `data` cannot be serialized.
pub fn created<T: Serialize>(data: &T) -> Result<Response, ApiError> {
    respond(StatusCode::CREATED, data)
}

/// `200 ALL_OK` without data.
#[must_use]
pub fn ack() -> Response {
    (StatusCode::OK, Json(Reply::new(ReplyStatus::AllOk))).into_response()
}

fn respond<T: Serialize>(status: StatusCode, data: &T) -> Result<Response, ApiError> {
    let data = serde_json::to_value(data)
        .map_err(|err| ApiError::Internal(format!("failed to serialize reply: {err}")))?;
    Ok((status, Json(Reply::new(ReplyStatus::AllOk).with_data(data))).into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No usable token on a gated route (unknown, revoked or expired).
    #[error("Authentication credentials were not provided or are invalid")]
    Unauthorized,
    /// Access gate denied the caller's role.
    #[error("Not permitted")]
    Forbidden,
    /// Payload-level failure with a specific user-facing message.
    #[error("{0}")]
    FieldError(String),
    /// Malformed CRUD payload or query.
    #[error("{0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    /// Wrong method, or a workflow entered without a valid token.
    #[error("Not Allowed")]
    NotAllowed,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub fn field(message: impl Into<String>) -> Self {
        Self::FieldError(message.into())
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::FieldError(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn reply_status(&self) -> ReplyStatus {
        match self {
            Self::Unauthorized | Self::Forbidden | Self::NotAllowed => ReplyStatus::NotAllowed,
            Self::FieldError(_) | Self::Validation(_) => ReplyStatus::FieldError,
            Self::NotFound | Self::Internal(_) => ReplyStatus::NotOk,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Internal(detail) => {
                error!("Failed to handle request: {detail}");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        let reply = Reply::new(self.reply_status()).with_message(message);
        (self.status_code(), Json(reply)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::field("Record already exists"),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Unwrap an extracted JSON body. Rejections (no body, wrong content type,
/// malformed JSON, missing or mistyped fields) keep axum's explanation.
///
/// # Errors
/// Returns [`ApiError::Validation`] carrying the rejection text.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

/// Method fallback for routes that only expose some operations.
pub async fn not_allowed() -> ApiError {
    ApiError::NotAllowed
}

/// Router fallback for unknown paths.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
