//! Authentication and authorization.
//!
//! Bearer tokens are opaque random strings; only their SHA-256 hash is stored.
//! Every request resolves its token into a [`principal::Caller`] which the
//! [`gate::AccessGate`] of the route then admits or denies.

pub mod credentials;
pub mod current_user;
pub mod gate;
pub mod password;
pub mod principal;
pub mod session;
pub mod state;
pub mod token;
pub mod types;


pub use gate::AccessGate;
pub use principal::{resolve_caller, Caller, Role, TokenState};
pub use state::{expiry_after, AuthConfig, RotationLocks, MAX_TTL_SECONDS};

use crate::api::reply::not_allowed;
use axum::{
    routing::{get, post},
    Router,
};

/// Function-style auth endpoints. Each answers `NOT_ALLOWED` for methods it
/// does not support.
pub fn router() -> Router {
    Router::new()
        .route(
            "/reset_password",
            post(password::reset_password).fallback(not_allowed),
        )
        .route(
            "/current_user",
            get(current_user::current_user).fallback(not_allowed),
        )
        .route("/login", post(session::login).fallback(not_allowed))
        .route("/logout", post(session::logout).fallback(not_allowed))
}
