//! Per-playlist sync bookkeeping, persisted as one JSON file.
//!
//! The file is rewritten atomically (temp file + rename) after every sync
//! attempt, failures included: a sync with failed tracks still happened.
//! A missing or corrupt file degrades to "nothing synced yet".

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// What a playlist listing should display for sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    NeverSynced,
    /// The catalog's snapshot id moved since the last sync.
    NeedsSync,
    Synced(DateTime<Utc>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub name: String,
    pub owner: Option<String>,
    pub snapshot_id: Option<String>,
    pub last_synced: DateTime<Utc>,
}

pub struct SyncStatusStore {
    path: PathBuf,
}

impl SyncStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> HashMap<String, SyncRecord> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Sync status file unreadable, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        }
    }

    async fn write(&self, records: &HashMap<String, SyncRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Record a sync attempt for one playlist, replacing any prior record.
    pub async fn update(&self, playlist_id: &str, record: SyncRecord) -> Result<()> {
        let mut records = self.load().await;
        records.insert(playlist_id.to_string(), record);
        self.write(&records).await
    }

    pub async fn remove(&self, playlist_id: &str) -> Result<()> {
        let mut records = self.load().await;
        if records.remove(playlist_id).is_some() {
            self.write(&records).await?;
        }
        Ok(())
    }

    pub async fn get(&self, playlist_id: &str) -> Option<SyncRecord> {
        self.load().await.get(playlist_id).cloned()
    }

    /// Compute the display state for a playlist given its current
    /// snapshot id.
    pub async fn status_for(
        &self,
        playlist_id: &str,
        current_snapshot_id: Option<&str>,
    ) -> SyncState {
        match self.get(playlist_id).await {
            None => SyncState::NeverSynced,
            Some(record) => {
                let stored = record.snapshot_id.as_deref();
                if stored != current_snapshot_id {
                    SyncState::NeedsSync
                } else {
                    SyncState::Synced(record.last_synced)
                }
            }
        }
    }
}
