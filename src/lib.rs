//! # Grizzly (staff, member and envelope accounts)
//!
//! `grizzly` is the account-and-claim layer of the Grizzly platform. It exposes
//! CRUD endpoints for staff and member identities and for the envelope family
//! (levels, settings, claims and deposits), enforces role-based access, and
//! runs the password reset workflow for staff.
//!
//! ## Roles
//!
//! Roles are never stored. Every request derives one from its bearer token:
//! `admin` (identity carries the admin flag), `staff`, `member`, or
//! `anonymous` when no identity can be resolved.
//!
//! ## Views over one collection
//!
//! Members, envelope claims and envelope levels are exposed twice: a
//! `/manage/...` view with the full CRUD surface for staff and admins, and a
//! read-only `/member/...` view open to everyone. Both views share one store;
//! the route decides which operations exist, never the caller's role.
//!
//! ## Credential rotation
//!
//! `POST /reset_password` re-authenticates the caller with the previous
//! password, applies the password policy, stores the new hash and revokes every
//! token the identity holds in a single store transaction.

pub mod api;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
