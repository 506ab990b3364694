//! Shared state handed to every request handler.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::db::DbState;
use crate::error::AppResult;
use crate::mapping::UnifiedSyncEngine;
use crate::nayax::NayaxClient;
use crate::storage::{self, SecretStore};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbState>,
    pub config: Arc<Config>,
    pub secrets: Arc<dyn SecretStore>,
    pub nayax: NayaxClient,
}

impl AppState {
    pub fn new(db: DbState, config: Config) -> AppResult<Self> {
        let secrets = storage::open_store(config.secret_backend);
        let nayax = NayaxClient::new(Duration::from_secs(config.nayax_timeout_secs))?;
        Ok(Self {
            db: Arc::new(db),
            config: Arc::new(config),
            secrets,
            nayax,
        })
    }

    pub fn engine(&self) -> UnifiedSyncEngine<'_> {
        UnifiedSyncEngine::new(
            &self.db,
            self.secrets.as_ref(),
            &self.nayax,
            self.config.cache_fresh_minutes,
        )
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        let config = Config::for_test();
        Self::new(crate::db::test_db(), config).expect("test state")
    }
}
