//! Navidrome backend, speaking the Subsonic REST API.
//!
//! Auth is the Subsonic salted-token scheme: `t = md5(password + salt)`
//! with a fresh salt per request. Every response is wrapped in a
//! `subsonic-response` envelope whose `status` field carries failures.

use crate::clients::media_server::MediaServer;
use crate::error::{AppError, Result};
use crate::models::{LibraryTrack, ServerSource};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const API_VERSION: &str = "1.16.1";
const CLIENT_NAME: &str = "playlist-sync-engine";
const PAGE_SIZE: u32 = 500;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "subsonic-response")]
    body: EnvelopeBody<T>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody<T> {
    status: String,
    error: Option<SubsonicError>,
    #[serde(flatten)]
    payload: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SubsonicError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchResult3Wire {
    #[serde(rename = "searchResult3")]
    search_result: SearchSongsWire,
}

#[derive(Debug, Deserialize)]
struct SearchSongsWire {
    #[serde(default)]
    song: Vec<SongWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SongWire {
    id: String,
    title: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    track: Option<u32>,
    /// Seconds.
    #[serde(default)]
    duration: Option<u64>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScanStatusWire {
    #[serde(rename = "scanStatus")]
    scan_status: ScanStatusBody,
}

#[derive(Debug, Deserialize)]
struct ScanStatusBody {
    #[serde(default)]
    scanning: bool,
}

#[derive(Debug, Deserialize)]
struct PlaylistsWire {
    playlists: PlaylistListWire,
}

#[derive(Debug, Deserialize)]
struct PlaylistListWire {
    #[serde(default)]
    playlist: Vec<PlaylistRefWire>,
}

#[derive(Debug, Deserialize)]
struct PlaylistRefWire {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistWire {
    playlist: PlaylistEntriesWire,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntriesWire {
    #[serde(default)]
    entry: Vec<SongWire>,
}

pub struct NavidromeClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl NavidromeClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    fn auth_params(&self) -> Vec<(String, String)> {
        let salt: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        let token = format!("{:x}", md5::compute(format!("{}{}", self.password, salt)));
        vec![
            ("u".to_string(), self.username.clone()),
            ("t".to_string(), token),
            ("s".to_string(), salt),
            ("v".to_string(), API_VERSION.to_string()),
            ("c".to_string(), CLIENT_NAME.to_string()),
            ("f".to_string(), "json".to_string()),
        ]
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = format!("{}/rest/{}", self.base_url, endpoint);
        let mut query = self.auth_params();
        for (k, v) in params {
            query.push((k.to_string(), v.clone()));
        }

        let response = self.http.get(&url).query(&query).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::ServiceUnavailable {
                service: "navidrome".to_string(),
            });
        }
        if !status.is_success() {
            return Err(AppError::ServiceError {
                service: "navidrome".to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.body.status == "failed" {
            let error = envelope.body.error.unwrap_or(SubsonicError {
                code: 0,
                message: "unknown error".to_string(),
            });
            // Subsonic error 40 is bad credentials.
            if error.code == 40 {
                return Err(AppError::InvalidApiKey {
                    service: "navidrome".to_string(),
                });
            }
            return Err(AppError::ServiceError {
                service: "navidrome".to_string(),
                message: format!("error {}: {}", error.code, error.message),
            });
        }
        Ok(envelope.body.payload)
    }

    async fn find_playlist(&self, name: &str) -> Result<Option<PlaylistRefWire>> {
        let listing: Option<PlaylistsWire> = self.get("getPlaylists", &[]).await?;
        Ok(listing
            .map(|l| l.playlists.playlist)
            .unwrap_or_default()
            .into_iter()
            .find(|p| p.name == name))
    }

    async fn playlist_song_ids(&self, id: &str) -> Result<Vec<String>> {
        let playlist: Option<PlaylistWire> = self
            .get("getPlaylist", &[("id", id.to_string())])
            .await?;
        Ok(playlist
            .map(|p| p.playlist.entry)
            .unwrap_or_default()
            .into_iter()
            .map(|song| song.id)
            .collect())
    }

    async fn create_playlist(&self, name: &str, song_ids: &[String]) -> Result<()> {
        let mut params: Vec<(&str, String)> = vec![("name", name.to_string())];
        for id in song_ids {
            params.push(("songId", id.clone()));
        }
        let _: Option<serde_json::Value> = self.get("createPlaylist", &params).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaServer for NavidromeClient {
    fn source(&self) -> ServerSource {
        ServerSource::Navidrome
    }

    async fn is_connected(&self) -> bool {
        self.get::<serde_json::Value>("ping", &[]).await.is_ok()
    }

    async fn list_tracks(&self) -> Result<Vec<LibraryTrack>> {
        let mut tracks = Vec::new();
        let mut offset = 0u32;

        loop {
            let result: Option<SearchResult3Wire> = self
                .get(
                    "search3",
                    &[
                        ("query", "".to_string()),
                        ("songCount", PAGE_SIZE.to_string()),
                        ("songOffset", offset.to_string()),
                        ("artistCount", "0".to_string()),
                        ("albumCount", "0".to_string()),
                    ],
                )
                .await?;

            let songs = result.map(|r| r.search_result.song).unwrap_or_default();
            let fetched = songs.len() as u32;

            for song in songs {
                tracks.push(LibraryTrack {
                    id: song.id,
                    title: song.title,
                    artist_name: song.artist.unwrap_or_default(),
                    album_title: song.album,
                    track_number: song.track,
                    duration_ms: song.duration.map(|s| s * 1000),
                    file_path: song.path,
                    server_source: ServerSource::Navidrome,
                });
            }

            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        debug!(count = tracks.len(), "Loaded Navidrome library tracks");
        Ok(tracks)
    }

    async fn trigger_scan(&self) -> Result<()> {
        let _: Option<serde_json::Value> = self.get("startScan", &[]).await?;
        Ok(())
    }

    async fn is_scanning(&self) -> Result<bool> {
        let status: Option<ScanStatusWire> = self.get("getScanStatus", &[]).await?;
        Ok(status.map(|s| s.scan_status.scanning).unwrap_or(false))
    }

    async fn create_or_update_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        backup_name: Option<&str>,
    ) -> Result<()> {
        if let Some(existing) = self.find_playlist(name).await? {
            if let Some(backup) = backup_name {
                let old_songs = self.playlist_song_ids(&existing.id).await?;
                if !old_songs.is_empty() {
                    self.create_playlist(backup, &old_songs).await?;
                }
            }
            let _: Option<serde_json::Value> = self
                .get("deletePlaylist", &[("id", existing.id.clone())])
                .await?;
        }

        self.create_playlist(name, track_ids).await
    }
}
