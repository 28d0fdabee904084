//! Shared application context: explicit dependency injection instead of
//! process-global singletons. Constructed once at startup and handed to
//! component constructors.

use crate::config::{AppConfig, ConfigStore};
use crate::database::connect_sqlite;
use crate::error::Result;
use crate::events::EventBus;
use crate::services::{SyncStatusStore, WishlistStore};
use std::sync::Arc;

pub struct AppContext {
    pub config: AppConfig,
    pub settings: Arc<ConfigStore>,
    pub wishlist: Arc<WishlistStore>,
    pub sync_status: Arc<SyncStatusStore>,
    pub bus: EventBus,
}

impl AppContext {
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        let config_pool = connect_sqlite(&config.config_db_path).await?;
        let settings = Arc::new(ConfigStore::open(config_pool, &config.config_path).await?);
        settings
            .ensure_encryption_key(&config.encryption_key_path())
            .await?;

        let wishlist_pool = connect_sqlite(&config.database_path).await?;
        let wishlist = Arc::new(WishlistStore::new(wishlist_pool).await?);

        let sync_status = Arc::new(SyncStatusStore::new(config.sync_status_path()));

        Ok(Self {
            config,
            settings,
            wishlist,
            sync_status,
            bus: EventBus::default(),
        })
    }
}
