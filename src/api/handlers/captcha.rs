//! Captcha challenges.
//!
//! The issuer hands out structured references (`captcha_val` plus the URL the
//! image renderer serves it under); rendering itself lives elsewhere.

use crate::api::{
    handlers::auth::expiry_after,
    reply::{self, ApiError},
    state::AppState,
};
use crate::store::{CaptchaChallenge, CaptchaStore, StoreError};
use axum::{extract::Extension, response::Response};
use chrono::Utc;
use rand::{distributions::Uniform, Rng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use ulid::Ulid;
use utoipa::ToSchema;

const RESPONSE_LEN: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CaptchaReference {
    pub captcha_src: String,
    pub captcha_val: String,
}

pub struct CaptchaIssuer<'a> {
    store: &'a dyn CaptchaStore,
    ttl_seconds: i64,
    base_url: &'a str,
}

impl<'a> CaptchaIssuer<'a> {
    #[must_use]
    pub fn new(store: &'a dyn CaptchaStore, ttl_seconds: i64, base_url: &'a str) -> Self {
        Self {
            store,
            ttl_seconds,
            base_url,
        }
    }

    #[must_use]
    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(
            state.captchas(),
            state.config().captcha_ttl_seconds(),
            state.config().captcha_base_url(),
        )
    }

    /// Store a fresh challenge and return its reference. Every call yields a
    /// new, distinct pair.
    ///
    /// # Errors
    /// Returns an error if the TTL overflows or the challenge cannot be stored.
    pub async fn issue(&self) -> Result<CaptchaReference, ApiError> {
        let expires_at = expiry_after(Utc::now(), self.ttl_seconds).ok_or_else(|| {
            ApiError::Internal(format!("captcha TTL out of range: {}s", self.ttl_seconds))
        })?;
        let key = Ulid::new().to_string();
        self.store
            .insert_challenge(CaptchaChallenge {
                key: key.clone(),
                response: random_response(),
                expires_at,
            })
            .await?;
        Ok(CaptchaReference {
            captcha_src: format!("{}/image/{key}/", self.base_url),
            captcha_val: key,
        })
    }

    /// Consume the challenge and compare case-insensitively. A key verifies at
    /// most once, whatever the outcome.
    ///
    /// # Errors
    /// Returns an error if the store lookup fails.
    pub async fn verify(&self, key: &str, response: &str) -> Result<bool, StoreError> {
        let Some(challenge) = self.store.take_challenge(key).await? else {
            debug!("Unknown or already used captcha key");
            return Ok(false);
        };
        if challenge.expires_at <= Utc::now() {
            debug!("Captcha challenge expired");
            return Ok(false);
        }
        Ok(challenge.response.eq_ignore_ascii_case(response.trim()))
    }
}

fn random_response() -> String {
    let letters = Uniform::new_inclusive(b'A', b'Z');
    rand::thread_rng()
        .sample_iter(letters)
        .take(RESPONSE_LEN)
        .map(char::from)
        .collect()
}

#[utoipa::path(
    get,
    path = "/captcha",
    responses(
        (status = 200, description = "Fresh captcha reference", body = crate::api::reply::Reply)
    ),
    tag = "captcha"
)]
pub async fn captcha(state: Extension<Arc<AppState>>) -> Result<Response, ApiError> {
    let reference = CaptchaIssuer::from_state(&state).issue().await?;
    reply::ok(&reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::{Context, Result};
    use chrono::Duration;

    #[test]
    fn responses_are_uppercase_letters() {
        let response = random_response();
        assert_eq!(response.len(), RESPONSE_LEN);
        assert!(response.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn issue_returns_distinct_references() -> Result<()> {
        let store = MemoryStore::new();
        let issuer = CaptchaIssuer::new(&store, 300, "https://grizzly.dev/captcha");
        let first = issuer.issue().await?;
        let second = issuer.issue().await?;
        assert_ne!(first, second);
        assert_eq!(
            first.captcha_src,
            format!("https://grizzly.dev/captcha/image/{}/", first.captcha_val)
        );
        Ok(())
    }

    #[tokio::test]
    async fn verify_consumes_challenge() -> Result<()> {
        let store = MemoryStore::new();
        let issuer = CaptchaIssuer::new(&store, 300, "/captcha");
        let reference = issuer.issue().await?;
        let challenge = store
            .take_challenge(&reference.captcha_val)
            .await?
            .context("stored challenge")?;
        // Put it back so the issuer can consume it.
        store.insert_challenge(challenge.clone()).await?;

        let answer = challenge.response.to_lowercase();
        assert!(issuer.verify(&reference.captcha_val, &answer).await?);
        assert!(!issuer.verify(&reference.captcha_val, &answer).await?);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_answer_still_burns_the_key() -> Result<()> {
        let store = MemoryStore::new();
        store
            .insert_challenge(CaptchaChallenge {
                key: "k".to_string(),
                response: "ABCD".to_string(),
                expires_at: Utc::now() + Duration::minutes(5),
            })
            .await?;
        let issuer = CaptchaIssuer::new(&store, 300, "/captcha");
        assert!(!issuer.verify("k", "WXYZ").await?);
        assert!(!issuer.verify("k", "ABCD").await?);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_ttl_is_an_error_not_a_panic() -> Result<()> {
        let store = MemoryStore::new();
        let issuer = CaptchaIssuer::new(&store, i64::MAX, "/captcha");
        let result = issuer.issue().await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
        Ok(())
    }

    #[tokio::test]
    async fn expired_challenges_fail() -> Result<()> {
        let store = MemoryStore::new();
        let issuer = CaptchaIssuer::new(&store, -1, "/captcha");
        let reference = issuer.issue().await?;
        assert!(!issuer.verify(&reference.captcha_val, "ABCD").await?);
        Ok(())
    }
}
