use crate::models::Track;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of source a permanently-failed track came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WishlistSourceType {
    Playlist,
    Album,
    Artist,
}

impl WishlistSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WishlistSourceType::Playlist => "playlist",
            WishlistSourceType::Album => "album",
            WishlistSourceType::Artist => "artist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "playlist" => Some(WishlistSourceType::Playlist),
            "album" => Some(WishlistSourceType::Album),
            "artist" => Some(WishlistSourceType::Artist),
            _ => None,
        }
    }
}

impl fmt::Display for WishlistSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the failed track was encountered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContext {
    pub name: String,
    pub id: String,
    pub added_from: String,
    pub added_at: DateTime<Utc>,
}

impl SourceContext {
    pub fn playlist(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            added_from: "playlist_sync".to_string(),
            added_at: Utc::now(),
        }
    }
}

/// Durable record of a permanently-failed track. Keyed by the normalized
/// `(title, primary_artist)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WishlistEntry {
    pub track: Track,
    pub source_type: WishlistSourceType,
    pub source_context: SourceContext,
    pub added_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}
