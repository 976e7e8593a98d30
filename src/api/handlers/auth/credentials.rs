//! Password hashing, policy and re-authentication.

use crate::api::reply::ApiError;
use crate::store::{AccountStore, Identity, IdentityKind};
use anyhow::anyhow;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use regex::Regex;
use tracing::debug;

pub const PASSWORD_POLICY_MESSAGE: &str = "Password must be 6 to 15 alphanumeric characters";

/// 6 to 15 ASCII letters or digits.
pub fn valid_password(password: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9]{6,15}$").is_ok_and(|regex| regex.is_match(password))
}

/// # Errors
/// Returns [`ApiError::FieldError`] with the policy message.
pub fn check_policy(password: &str) -> Result<(), ApiError> {
    if valid_password(password) {
        Ok(())
    } else {
        Err(ApiError::field(PASSWORD_POLICY_MESSAGE))
    }
}

/// Argon2id PHC string with a fresh salt.
///
/// # Errors
/// Returns [`ApiError::Internal`] if hashing fails.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}").into())
}

/// A malformed stored hash never verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        debug!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Resolve `username` within `kind` and check `password` against it.
///
/// Unknown, inactive and wrong-password cases all return `Ok(None)`.
///
/// # Errors
/// Returns an error only if the store lookup fails.
pub async fn authenticate(
    accounts: &dyn AccountStore,
    kind: IdentityKind,
    username: &str,
    password: &str,
) -> Result<Option<Identity>, ApiError> {
    let Some(identity) = accounts.identity_by_username(kind, username).await? else {
        return Ok(None);
    };
    if !identity.is_active || !verify_password(password, &identity.password_hash) {
        return Ok(None);
    }
    Ok(Some(identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewIdentity};
    use anyhow::Result;

    #[test]
    fn policy_examples() {
        assert!(!valid_password("abc12"));
        assert!(!valid_password("abcdefghijklmnop"));
        assert!(!valid_password("abc 123"));
        assert!(!valid_password("abc-123"));
        assert!(!valid_password("pässwort1"));
        assert!(valid_password("Abc123"));
        assert!(valid_password("abcdefghijklmno"));
    }

    #[test]
    fn check_policy_uses_stable_message() {
        match check_policy("short") {
            Err(ApiError::FieldError(message)) => assert_eq!(message, PASSWORD_POLICY_MESSAGE),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn hash_then_verify() -> Result<()> {
        let hash = hash_password("Secret123")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Secret123", &hash));
        assert!(!verify_password("Secret124", &hash));
        assert!(!verify_password("Secret123", "not-a-phc-string"));
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_rejects_inactive_and_wrong_kind() -> Result<()> {
        let store = MemoryStore::new();
        let password_hash = hash_password("Secret123")?;
        store
            .insert_identity(NewIdentity {
                kind: IdentityKind::Staff,
                username: "sam".to_string(),
                password_hash: password_hash.clone(),
                is_admin: false,
                is_active: true,
                display_name: None,
            })
            .await?;
        store
            .insert_identity(NewIdentity {
                kind: IdentityKind::Staff,
                username: "gone".to_string(),
                password_hash,
                is_admin: false,
                is_active: false,
                display_name: None,
            })
            .await?;

        assert!(authenticate(&store, IdentityKind::Staff, "sam", "Secret123")
            .await?
            .is_some());
        assert!(authenticate(&store, IdentityKind::Staff, "sam", "wrong1")
            .await?
            .is_none());
        assert!(authenticate(&store, IdentityKind::Member, "sam", "Secret123")
            .await?
            .is_none());
        assert!(authenticate(&store, IdentityKind::Staff, "gone", "Secret123")
            .await?
            .is_none());
        Ok(())
    }
}
