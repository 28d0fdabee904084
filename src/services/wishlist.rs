//! Durable record of permanently-failed tracks.
//!
//! Keyed by the normalized `(title, primary_artist)` pair so retried syncs
//! of the same playlist, or the same song from different playlists, land
//! on one row. `add` keeps the earliest context; `resolve` is idempotent.

use crate::error::Result;
use crate::matching::normalize_for_match;
use crate::models::{SourceContext, Track, WishlistEntry, WishlistSourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    track: Track,
    source_type: WishlistSourceType,
    source_context: SourceContext,
}

/// Normalized key for a wishlist row.
pub fn wishlist_key(title: &str, primary_artist: &str) -> (String, String) {
    (
        normalize_for_match(title),
        normalize_for_match(primary_artist),
    )
}

pub struct WishlistStore {
    pool: SqlitePool,
}

impl WishlistStore {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wishlist (
                norm_title TEXT NOT NULL,
                norm_artist TEXT NOT NULL,
                source_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                added_at TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT,
                PRIMARY KEY (norm_title, norm_artist)
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Record a failed track. On conflict the earliest entry wins: the
    /// original `added_at` and source context are kept and nothing is
    /// incremented.
    pub async fn add(
        &self,
        track: &Track,
        source_type: WishlistSourceType,
        source_context: &SourceContext,
    ) -> Result<()> {
        let (norm_title, norm_artist) = wishlist_key(&track.title, track.primary_artist());
        let payload = serde_json::to_string(&Payload {
            track: track.clone(),
            source_type,
            source_context: source_context.clone(),
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO wishlist (norm_title, norm_artist, source_type, payload_json, added_at, retry_count)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT (norm_title, norm_artist) DO NOTHING
            "#,
        )
        .bind(&norm_title)
        .bind(&norm_artist)
        .bind(source_type.as_str())
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(title = %track.title, artist = %track.primary_artist(), "Wishlisted track");
        }
        Ok(())
    }

    /// Remove an entry by its normalized key. Removing an absent key is a
    /// no-op.
    pub async fn resolve(&self, norm_title: &str, norm_artist: &str) -> Result<()> {
        sqlx::query("DELETE FROM wishlist WHERE norm_title = ? AND norm_artist = ?")
            .bind(norm_title)
            .bind(norm_artist)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a retry attempt.
    pub async fn bump(&self, norm_title: &str, norm_artist: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wishlist
            SET retry_count = retry_count + 1, last_attempt_at = ?
            WHERE norm_title = ? AND norm_artist = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(norm_title)
        .bind(norm_artist)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All entries, newest first, optionally filtered by source type.
    pub async fn list(&self, filter: Option<WishlistSourceType>) -> Result<Vec<WishlistEntry>> {
        let rows = match filter {
            Some(source_type) => {
                sqlx::query(
                    r#"
                    SELECT payload_json, added_at, retry_count, last_attempt_at
                    FROM wishlist WHERE source_type = ? ORDER BY added_at DESC
                    "#,
                )
                .bind(source_type.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT payload_json, added_at, retry_count, last_attempt_at
                    FROM wishlist ORDER BY added_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: Payload = serde_json::from_str(row.get::<String, _>("payload_json").as_str())?;
            let added_at = DateTime::parse_from_rfc3339(row.get::<String, _>("added_at").as_str())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let last_attempt_at = row
                .get::<Option<String>, _>("last_attempt_at")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc));

            entries.push(WishlistEntry {
                track: payload.track,
                source_type: payload.source_type,
                source_context: payload.source_context,
                added_at,
                retry_count: row.get::<i64, _>("retry_count") as u32,
                last_attempt_at,
            });
        }
        Ok(entries)
    }

    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM wishlist")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM wishlist").execute(&self.pool).await?;
        Ok(())
    }
}
