use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which media server a library row came from. `(server_source, id)` is the
/// unique identity of a library track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerSource {
    Plex,
    Jellyfin,
    Navidrome,
}

impl ServerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerSource::Plex => "plex",
            ServerSource::Jellyfin => "jellyfin",
            ServerSource::Navidrome => "navidrome",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plex" => Some(ServerSource::Plex),
            "jellyfin" => Some(ServerSource::Jellyfin),
            "navidrome" => Some(ServerSource::Navidrome),
            _ => None,
        }
    }
}

impl fmt::Display for ServerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A track as supplied by the source catalog or YouTube ingestion.
///
/// `raw_title`/`raw_uploader` are only present for YouTube-ingested tracks
/// and are preserved verbatim for the resolver's fallback queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    /// Ordered, non-empty; `artists[0]` is the primary artist.
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_uploader: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub external_urls: HashMap<String, String>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists,
            album: None,
            duration_ms: None,
            raw_title: None,
            raw_uploader: None,
            external_urls: HashMap::new(),
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn primary_artist(&self) -> &str {
        self.artists.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_youtube_sourced(&self) -> bool {
        self.raw_title.is_some() || self.raw_uploader.is_some()
    }
}

/// A source playlist, immutable within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    /// Opaque version token from the source catalog; changes iff the
    /// playlist changes.
    pub snapshot_id: Option<String>,
    pub owner: Option<String>,
    pub tracks: Vec<Track>,
}

/// Playlist metadata as returned by a catalog listing, before tracks are
/// fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub snapshot_id: Option<String>,
    pub owner: Option<String>,
    pub total_tracks: u32,
}

/// Canonical identity of a track in the local library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryTrack {
    pub id: String,
    pub title: String,
    pub artist_name: String,
    pub album_title: Option<String>,
    pub track_number: Option<u32>,
    pub duration_ms: Option<u64>,
    pub file_path: Option<String>,
    pub server_source: ServerSource,
}
