//! Streaming catalog access (Spotify-shaped REST surface).
//!
//! Auth is opaque to the engine: the client is handed an
//! [`AccessTokenSource`] and never sees how tokens are minted or refreshed.

use crate::error::{AppError, Result};
use crate::models::{Playlist, PlaylistSummary, Track};
use crate::recovery::{retry_external_operation, RetryConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Album classification used by the resolver's album-preference bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumKind {
    Album,
    Single,
    Compilation,
}

impl AlbumKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "album" => Some(AlbumKind::Album),
            "single" => Some(AlbumKind::Single),
            "compilation" => Some(AlbumKind::Compilation),
            _ => None,
        }
    }
}

/// A search hit from the catalog, with the album metadata the resolver
/// needs for ranking.
#[derive(Debug, Clone)]
pub struct CatalogTrack {
    pub track: Track,
    pub album_kind: Option<AlbumKind>,
    pub album_total_tracks: Option<u32>,
}

impl CatalogTrack {
    /// Prefer proper album cuts (10+ tracks) over singles of the same
    /// song; compilations sit in between. EP-sized "albums" and albums
    /// with no reported track count earn nothing.
    pub fn album_preference_bonus(&self) -> f64 {
        match self.album_kind {
            Some(AlbumKind::Album) => {
                if self.album_total_tracks.map(|n| n >= 10).unwrap_or(false) {
                    0.05
                } else {
                    0.0
                }
            }
            Some(AlbumKind::Single) => -0.02,
            Some(AlbumKind::Compilation) => 0.02,
            None => 0.0,
        }
    }
}

/// Read-only catalog surface.
#[async_trait]
pub trait StreamingCatalog: Send + Sync {
    async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>>;
    async fn get_playlist(&self, id: &str) -> Result<Playlist>;
    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<CatalogTrack>>;
}

/// Supplies a bearer token on demand. OAuth lives outside the engine.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, for tests and externally-managed auth.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
struct PagingWire<T> {
    #[serde(default)]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistSummaryWire {
    id: String,
    name: String,
    snapshot_id: Option<String>,
    owner: Option<OwnerWire>,
    tracks: Option<TracksRefWire>,
}

#[derive(Debug, Deserialize)]
struct OwnerWire {
    display_name: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TracksRefWire {
    #[serde(default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct PlaylistWire {
    id: String,
    name: String,
    snapshot_id: Option<String>,
    owner: Option<OwnerWire>,
    tracks: PagingWire<PlaylistItemWire>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemWire {
    track: Option<TrackWire>,
}

#[derive(Debug, Deserialize)]
struct TrackWire {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistWire>,
    album: Option<AlbumWire>,
    duration_ms: Option<u64>,
    #[serde(default)]
    external_urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ArtistWire {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumWire {
    name: String,
    album_type: Option<String>,
    total_tracks: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SearchWire {
    tracks: PagingWire<TrackWire>,
}

fn track_from_wire(wire: TrackWire) -> Track {
    Track {
        id: wire.id.unwrap_or_default(),
        title: wire.name,
        artists: wire.artists.into_iter().map(|a| a.name).collect(),
        album: wire.album.as_ref().map(|a| a.name.clone()),
        duration_ms: wire.duration_ms,
        raw_title: None,
        raw_uploader: None,
        external_urls: wire.external_urls,
    }
}

/// Spotify Web API client.
pub struct SpotifyCatalog {
    http: reqwest::Client,
    base_url: String,
    token_source: Arc<dyn AccessTokenSource>,
}

impl SpotifyCatalog {
    pub fn new(token_source: Arc<dyn AccessTokenSource>) -> Result<Self> {
        Self::with_base_url("https://api.spotify.com", token_source)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        token_source: Arc<dyn AccessTokenSource>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_source,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.token_source.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(AppError::RateLimited {
                service: "spotify".to_string(),
                retry_after,
            });
        }
        if status.is_server_error() {
            return Err(AppError::ServiceUnavailable {
                service: "spotify".to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ServiceError {
                service: "spotify".to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        Ok(response.json().await?)
    }

    async fn get_json_with_retry<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        retry_external_operation(
            || self.get_json::<T>(url),
            RetryConfig::remote_lookup(),
            "spotify_get",
        )
        .await
    }
}

#[async_trait]
impl StreamingCatalog for SpotifyCatalog {
    async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        let mut playlists = Vec::new();
        let mut url = format!("{}/v1/me/playlists?limit=50", self.base_url);

        loop {
            let page: PagingWire<PlaylistSummaryWire> = self.get_json_with_retry(&url).await?;
            for item in page.items {
                playlists.push(PlaylistSummary {
                    id: item.id,
                    name: item.name,
                    snapshot_id: item.snapshot_id,
                    owner: item
                        .owner
                        .and_then(|o| o.display_name.or(o.id)),
                    total_tracks: item.tracks.map(|t| t.total).unwrap_or(0),
                });
            }
            match page.next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(playlists)
    }

    async fn get_playlist(&self, id: &str) -> Result<Playlist> {
        let url = format!("{}/v1/playlists/{}", self.base_url, id);
        let wire: PlaylistWire = self.get_json_with_retry(&url).await?;

        let mut tracks: Vec<Track> = wire
            .tracks
            .items
            .into_iter()
            .filter_map(|item| item.track)
            .map(track_from_wire)
            .collect();

        // Playlists over the page size paginate through the tracks endpoint.
        let mut next = wire.tracks.next;
        while let Some(url) = next {
            let page: PagingWire<PlaylistItemWire> = self.get_json_with_retry(&url).await?;
            tracks.extend(
                page.items
                    .into_iter()
                    .filter_map(|item| item.track)
                    .map(track_from_wire),
            );
            next = page.next;
        }

        Ok(Playlist {
            id: wire.id,
            name: wire.name,
            snapshot_id: wire.snapshot_id,
            owner: wire.owner.and_then(|o| o.display_name.or(o.id)),
            tracks,
        })
    }

    async fn search_tracks(&self, query: &str, limit: u32) -> Result<Vec<CatalogTrack>> {
        let url = format!(
            "{}/v1/search?type=track&limit={}&q={}",
            self.base_url,
            limit.min(50),
            urlencoding::encode(query)
        );
        let wire: SearchWire = self.get_json_with_retry(&url).await?;

        Ok(wire
            .tracks
            .items
            .into_iter()
            .map(|t| {
                let album_kind = t
                    .album
                    .as_ref()
                    .and_then(|a| a.album_type.as_deref())
                    .and_then(AlbumKind::parse);
                let album_total_tracks = t.album.as_ref().and_then(|a| a.total_tracks);
                CatalogTrack {
                    track: track_from_wire(t),
                    album_kind,
                    album_total_tracks,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_kind_parses_catalog_values() {
        assert_eq!(AlbumKind::parse("album"), Some(AlbumKind::Album));
        assert_eq!(AlbumKind::parse("Single"), Some(AlbumKind::Single));
        assert_eq!(AlbumKind::parse("compilation"), Some(AlbumKind::Compilation));
        assert_eq!(AlbumKind::parse("appears_on"), None);
    }

    #[test]
    fn preference_bonus_favors_full_albums() {
        let make = |kind, total| CatalogTrack {
            track: Track::new("t", "Song", vec!["A".to_string()]),
            album_kind: kind,
            album_total_tracks: total,
        };
        assert_eq!(
            make(Some(AlbumKind::Album), Some(22)).album_preference_bonus(),
            0.05
        );
        // An EP-sized "album" does not outrank anything.
        assert_eq!(
            make(Some(AlbumKind::Album), Some(3)).album_preference_bonus(),
            0.0
        );
        // No reported track count means no bonus either.
        assert_eq!(
            make(Some(AlbumKind::Album), None).album_preference_bonus(),
            0.0
        );
        assert_eq!(
            make(Some(AlbumKind::Single), Some(1)).album_preference_bonus(),
            -0.02
        );
        assert_eq!(
            make(Some(AlbumKind::Compilation), Some(40)).album_preference_bonus(),
            0.02
        );
        assert_eq!(make(None, None).album_preference_bonus(), 0.0);
    }
}
