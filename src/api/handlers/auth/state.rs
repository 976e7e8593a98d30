//! Auth configuration and per-identity rotation locks.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_CAPTCHA_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_CAPTCHA_BASE_URL: &str = "/captcha";

/// Upper bound for every configurable TTL (one year).
pub const MAX_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

/// `now + seconds`, or `None` when the instant is not representable.
#[must_use]
pub fn expiry_after(now: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|ttl| now.checked_add_signed(ttl))
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    token_ttl_seconds: i64,
    captcha_ttl_seconds: i64,
    captcha_base_url: String,
    login_captcha: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            captcha_ttl_seconds: DEFAULT_CAPTCHA_TTL_SECONDS,
            captcha_base_url: DEFAULT_CAPTCHA_BASE_URL.to_string(),
            login_captcha: false,
        }
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_captcha_ttl_seconds(mut self, seconds: i64) -> Self {
        self.captcha_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_captcha_base_url(mut self, base_url: String) -> Self {
        // Trailing slashes would double up in `<base>/image/<key>/`.
        self.captcha_base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_login_captcha(mut self, required: bool) -> Self {
        self.login_captcha = required;
        self
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn captcha_ttl_seconds(&self) -> i64 {
        self.captcha_ttl_seconds
    }

    #[must_use]
    pub fn captcha_base_url(&self) -> &str {
        &self.captcha_base_url
    }

    #[must_use]
    pub fn login_captcha(&self) -> bool {
        self.login_captcha
    }
}

/// Serializes credential rotations per identity.
///
/// Entries are dropped once no rotation holds or waits on them, so the map
/// only ever holds identities with a rotation in flight.
#[derive(Debug, Default)]
pub struct RotationLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl RotationLocks {
    pub async fn lock(&self, identity_id: Uuid) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(identity_id).or_default().clone()
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_builders() {
        let config = AuthConfig::new()
            .with_token_ttl_seconds(60)
            .with_captcha_ttl_seconds(30)
            .with_captcha_base_url("https://grizzly.dev/captcha/".to_string())
            .with_login_captcha(true);
        assert_eq!(config.token_ttl_seconds(), 60);
        assert_eq!(config.captcha_ttl_seconds(), 30);
        assert_eq!(config.captcha_base_url(), "https://grizzly.dev/captcha");
        assert!(config.login_captcha());
    }

    #[test]
    fn config_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.token_ttl_seconds(), 43_200);
        assert_eq!(config.captcha_ttl_seconds(), 300);
        assert_eq!(config.captcha_base_url(), "/captcha");
        assert!(!config.login_captcha());
    }

    #[test]
    fn expiry_after_rejects_out_of_range_ttls() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 60), Some(now + chrono::Duration::minutes(1)));
        assert!(expiry_after(now, MAX_TTL_SECONDS).is_some());
        assert!(expiry_after(now, i64::MAX).is_none());
        assert!(expiry_after(now, 10_000_000_000_000).is_none());
    }

    #[tokio::test]
    async fn same_identity_waits_for_holder() {
        let locks = Arc::new(RotationLocks::default());
        let id = Uuid::new_v4();
        let guard = locks.lock(id).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert!(
            tokio::time::timeout(Duration::from_secs(1), contender)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn other_identities_do_not_block() {
        let locks = RotationLocks::default();
        let _first = locks.lock(Uuid::new_v4()).await;
        let second = tokio::time::timeout(Duration::from_millis(100), locks.lock(Uuid::new_v4()));
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = RotationLocks::default();
        for _ in 0..3 {
            let _guard = locks.lock(Uuid::new_v4()).await;
        }
        // The next lock prunes idle entries before inserting its own.
        let _guard = locks.lock(Uuid::new_v4()).await;
        assert_eq!(locks.tracked().await, 1);
    }
}
