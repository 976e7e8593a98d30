use super::handlers::auth::{AuthConfig, RotationLocks};
use crate::store::{AccountStore, CaptchaStore, MemoryStore, PgStore, RecordStore};
use sqlx::PgPool;
use std::sync::Arc;

/// Shared by every handler through an `Extension<Arc<AppState>>`.
pub struct AppState {
    accounts: Arc<dyn AccountStore>,
    records: Arc<dyn RecordStore>,
    captchas: Arc<dyn CaptchaStore>,
    config: AuthConfig,
    rotation_locks: RotationLocks,
}

impl AppState {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        records: Arc<dyn RecordStore>,
        captchas: Arc<dyn CaptchaStore>,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            records,
            captchas,
            config,
            rotation_locks: RotationLocks::default(),
        }
    }

    /// Every collection in one process-local store.
    #[must_use]
    pub fn in_memory(config: AuthConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store.clone(), store, config)
    }

    #[must_use]
    pub fn postgres(pool: PgPool, config: AuthConfig) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self::new(store.clone(), store.clone(), store, config)
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    #[must_use]
    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    #[must_use]
    pub fn captchas(&self) -> &dyn CaptchaStore {
        self.captchas.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn rotation_locks(&self) -> &RotationLocks {
        &self.rotation_locks
    }
}
