//! Application configuration.
//!
//! Two layers: [`AppConfig`] is process configuration resolved from the
//! environment at startup; [`ConfigStore`] is the persisted user settings
//! blob, stored in the config database with a JSON-file fallback and
//! migration path.

use crate::error::{AppError, Result};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_usize(var: &str, default: usize) -> std::result::Result<usize, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: var.to_string(),
            message: format!("'{}' is not a number", raw),
        }),
        Err(_) => Ok(default),
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Settings file location; `SOULSYNC_CONFIG_PATH` overrides.
    pub config_path: PathBuf,
    /// Config database holding the settings blob.
    pub config_db_path: PathBuf,
    /// Wishlist database; `DATABASE_PATH` overrides.
    pub database_path: PathBuf,
    /// Sync-status JSON and other run artifacts.
    pub storage_dir: PathBuf,
    /// Where auto-downloaded helper binaries land.
    pub bin_dir: PathBuf,
    pub download_root: PathBuf,
    pub analysis_workers: usize,
    pub resolver_workers: usize,
    pub max_concurrent_downloads: usize,
    pub http_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let config = Self {
            config_path: env_path("SOULSYNC_CONFIG_PATH", "config/config.json"),
            config_db_path: env_path("SOULSYNC_CONFIG_DB", "config/config.db"),
            database_path: env_path("DATABASE_PATH", "storage/wishlist.db"),
            storage_dir: env_path("SOULSYNC_STORAGE_DIR", "storage"),
            bin_dir: env_path("SOULSYNC_BIN_DIR", "bin"),
            download_root: env_path("SOULSYNC_DOWNLOAD_DIR", "downloads"),
            analysis_workers: env_usize("SOULSYNC_ANALYSIS_WORKERS", 5)?,
            resolver_workers: env_usize("SOULSYNC_RESOLVER_WORKERS", 3)?,
            max_concurrent_downloads: env_usize("SOULSYNC_MAX_DOWNLOADS", 3)?,
            http_timeout: Duration::from_secs(15),
        };

        if config.max_concurrent_downloads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SOULSYNC_MAX_DOWNLOADS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(config)
    }

    pub fn sync_status_path(&self) -> PathBuf {
        self.storage_dir.join("sync_status.json")
    }

    pub fn encryption_key_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .unwrap_or_else(|| Path::new("config"))
            .join(".encryption_key")
    }
}

/// Persisted user settings: one JSON blob under `app_config` in the
/// `metadata` table, migrated from / falling back to the config file.
pub struct ConfigStore {
    pool: SqlitePool,
    config_file: PathBuf,
    values: RwLock<Value>,
}

impl ConfigStore {
    pub async fn open(pool: SqlitePool, config_file: impl Into<PathBuf>) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let config_file = config_file.into();
        let store = Self {
            pool,
            config_file,
            values: RwLock::new(Value::Null),
        };
        let initial = store.load_initial().await;
        *store.values.write().await = initial;
        Ok(store)
    }

    async fn load_initial(&self) -> Value {
        if let Some(values) = self.load_from_database().await {
            return values;
        }

        // Database empty: migrate a pre-existing config file, else start
        // from defaults.
        if let Some(values) = self.load_from_file() {
            info!("Migrating configuration from file to database");
            if let Err(e) = self.save_to_database(&values).await {
                warn!(error = %e, "Migration write failed, keeping file values");
            }
            return values;
        }

        let defaults = Self::default_config();
        if let Err(e) = self.save_to_database(&defaults).await {
            warn!(error = %e, "Could not persist default configuration");
        }
        defaults
    }

    async fn load_from_database(&self) -> Option<Value> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'app_config'")
            .fetch_optional(&self.pool)
            .await
            .ok()??;
        serde_json::from_str(row.get::<String, _>("value").as_str()).ok()
    }

    fn load_from_file(&self) -> Option<Value> {
        let bytes = std::fs::read(&self.config_file).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn save_to_database(&self, values: &Value) -> Result<()> {
        let blob = serde_json::to_string_pretty(values)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO metadata (key, value, updated_at)
            VALUES ('app_config', ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn save_to_file(&self, values: &Value) -> Result<()> {
        if let Some(parent) = self.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_file, serde_json::to_vec_pretty(values)?)?;
        Ok(())
    }

    fn default_config() -> Value {
        json!({
            "spotify": {
                "client_id": "",
                "client_secret": ""
            },
            "plex": {
                "base_url": "",
                "token": ""
            },
            "jellyfin": {
                "base_url": "",
                "api_key": ""
            },
            "navidrome": {
                "base_url": "",
                "username": "",
                "password": ""
            },
            "soulseek": {
                "slskd_url": "http://localhost:5030",
                "api_key": "",
                "download_path": "downloads",
                "quality_preference": "flac"
            },
            "acoustid": {
                "enabled": false,
                "api_key": ""
            },
            "settings": {
                "active_media_server": "plex",
                "crypto_enabled": false
            }
        })
    }

    /// Read a value by dotted path, e.g. `soulseek.slskd_url`.
    pub async fn get(&self, dotted_key: &str) -> Option<Value> {
        let values = self.values.read().await;
        let mut current = &*values;
        for part in dotted_key.split('.') {
            current = current.get(part)?;
        }
        Some(current.clone())
    }

    pub async fn get_str(&self, dotted_key: &str, default: &str) -> String {
        self.get(dotted_key)
            .await
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| default.to_string())
    }

    pub async fn get_bool(&self, dotted_key: &str, default: bool) -> bool {
        self.get(dotted_key)
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Set a value by dotted path and persist. A failed database write
    /// falls back to the config file so settings are never silently lost.
    pub async fn set(&self, dotted_key: &str, value: Value) -> Result<()> {
        let snapshot = {
            let mut values = self.values.write().await;
            if values.is_null() {
                *values = json!({});
            }

            let mut current = &mut *values;
            let parts: Vec<&str> = dotted_key.split('.').collect();
            for part in &parts[..parts.len() - 1] {
                if !current.get(*part).map(|v| v.is_object()).unwrap_or(false) {
                    current[*part] = json!({});
                }
                current = current
                    .get_mut(*part)
                    .ok_or_else(|| AppError::ConfigError {
                        message: format!("unreachable config path: {}", dotted_key),
                    })?;
            }
            current[parts[parts.len() - 1]] = value;
            values.clone()
        };

        if let Err(e) = self.save_to_database(&snapshot).await {
            warn!(error = %e, "Config database write failed, using file fallback");
            self.save_to_file(&snapshot)?;
        }
        Ok(())
    }

    pub async fn active_media_server(&self) -> String {
        self.get_str("settings.active_media_server", "plex").await
    }

    /// Create the encryption key file if crypto is enabled and the key is
    /// absent. POSIX mode 0600.
    pub async fn ensure_encryption_key(&self, key_path: &Path) -> Result<Option<PathBuf>> {
        if !self.get_bool("settings.crypto_enabled", false).await {
            return Ok(None);
        }
        if key_path.is_file() {
            return Ok(Some(key_path.to_path_buf()));
        }

        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let key: [u8; 32] = rand::random();
        let encoded: String = key.iter().map(|b| format!("{:02x}", b)).collect();
        std::fs::write(key_path, encoded)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
        }
        info!(path = %key_path.display(), "Created encryption key file");
        Ok(Some(key_path.to_path_buf()))
    }

    /// Which service sections are filled in enough to use.
    pub async fn validate(&self) -> HashMap<String, bool> {
        let mut report = HashMap::new();
        report.insert(
            "spotify".to_string(),
            !self.get_str("spotify.client_id", "").await.is_empty(),
        );
        report.insert(
            "plex".to_string(),
            !self.get_str("plex.base_url", "").await.is_empty()
                && !self.get_str("plex.token", "").await.is_empty(),
        );
        report.insert(
            "jellyfin".to_string(),
            !self.get_str("jellyfin.base_url", "").await.is_empty()
                && !self.get_str("jellyfin.api_key", "").await.is_empty(),
        );
        report.insert(
            "navidrome".to_string(),
            !self.get_str("navidrome.base_url", "").await.is_empty()
                && !self.get_str("navidrome.username", "").await.is_empty(),
        );
        report.insert(
            "soulseek".to_string(),
            !self.get_str("soulseek.slskd_url", "").await.is_empty(),
        );
        report.insert(
            "acoustid".to_string(),
            !self.get_str("acoustid.api_key", "").await.is_empty(),
        );
        report
    }
}
