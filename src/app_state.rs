//! Application State Management
//!
//! This module provides the application state that contains the relay
//! service and its dependencies, following the dependency injection pattern.

use log::info;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, KvBackend};
use crate::error::StoreError;
use crate::kv::mock_store::MockKvStore;
use crate::kv::sqlite_store::SqliteKvStore;
use crate::kv::KvStore;
use crate::service::relay_service::RelayService;

/// Application state shared by every worker
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, StoreError> {
        info!("Initializing application state with configuration");

        let store: Arc<dyn KvStore> = match config.storage.backend {
            KvBackend::Sqlite => {
                info!(
                    "Using SQLite key-value backend with db_path: {}, wal_mode: {}",
                    config.storage.db_path, config.storage.wal_mode
                );
                Arc::new(SqliteKvStore::open(&config.storage.db_path, config.storage.wal_mode)?)
            }
            KvBackend::Mock => {
                info!("Using mock key-value backend");
                Arc::new(MockKvStore::new())
            }
        };

        Ok(Self::with_parts(config, store, Arc::new(SystemClock)))
    }

    /// Assemble state over an explicit store and clock
    pub fn with_parts(config: AppConfig, store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let relay = Arc::new(RelayService::new(
            store,
            clock,
            config.limits.quota_limits(),
            config.expiry.ttl(),
        ));

        info!("Application state initialized successfully");
        Self { relay, config }
    }

    /// Create application state for testing with the mock backend
    pub fn new_for_testing() -> Self {
        Self::with_parts(AppConfig::for_testing(), Arc::new(MockKvStore::new()), Arc::new(SystemClock))
    }
}
