use super::handlers::{
    auth::{current_user, password, session, types as auth_types},
    captcha, health,
    resources::{docs, envelopes, types as resource_types},
};
use super::reply::{Reply, ReplyStatus};
use crate::store::IdentityKind;
use utoipa::{
    openapi::{
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
        License,
    },
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        session::login,
        session::logout,
        password::reset_password,
        current_user::current_user,
        captcha::captcha,
        envelopes::import,
    ),
    components(schemas(
        Reply,
        ReplyStatus,
        IdentityKind,
        health::Health,
        captcha::CaptchaReference,
        auth_types::LoginRequest,
        auth_types::LoginResponse,
        auth_types::ResetPasswordRequest,
        auth_types::CurrentUserResponse,
        resource_types::IdentityView,
        resource_types::PublicIdentity,
        resource_types::IdentityPayload,
        resource_types::RecordView,
        resource_types::ListResponse,
        resource_types::ImportResponse,
    )),
    modifiers(&BearerAuth, &ResourceViews),
    tags(
        (name = "auth", description = "Tokens, password reset and current identity"),
        (name = "captcha", description = "Captcha challenges"),
        (name = "envelopes", description = "Envelope import"),
        (name = "manage", description = "Staff and admin views over identities and envelopes"),
        (name = "member", description = "Public read-only views"),
        (name = "health", description = "Liveness")
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

struct ResourceViews;

impl Modify for ResourceViews {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        docs::document(&mut openapi.paths);
    }
}

/// Generated document served at `/api-docs/openapi.json`.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    // Carry the SPDX identifier too, not just the license name.
    doc.info.license = cargo_license();
    doc
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
