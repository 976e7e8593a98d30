//! Request and response payloads for the auth endpoints.

use crate::store::IdentityKind;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Absent fields are compared as absent: a missing `repeat_password` is a
/// mismatch, not a malformed request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub prev_password: Option<SecretString>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub new_password: Option<SecretString>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub repeat_password: Option<SecretString>,
}

fn exposed(secret: Option<&SecretString>) -> Option<&str> {
    secret.map(ExposeSecret::expose_secret)
}

impl ResetPasswordRequest {
    #[must_use]
    pub fn prev_password(&self) -> Option<&str> {
        exposed(self.prev_password.as_ref())
    }

    #[must_use]
    pub fn new_password(&self) -> Option<&str> {
        exposed(self.new_password.as_ref())
    }

    #[must_use]
    pub fn repeat_password(&self) -> Option<&str> {
        exposed(self.repeat_password.as_ref())
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CurrentUserResponse {
    pub username: String,
    /// `admin`, `staff` or `member`.
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    #[schema(value_type = String)]
    pub password: SecretString,
    #[serde(rename = "type")]
    pub kind: IdentityKind,
    #[serde(default)]
    pub captcha_key: Option<String>,
    #[serde(default)]
    pub captcha_value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
