//! Plex backend for the media-server interface.

use crate::clients::media_server::MediaServer;
use crate::error::{AppError, Result};
use crate::models::{LibraryTrack, ServerSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ContainerWire<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Deserialize)]
struct SectionsWire {
    #[serde(rename = "Directory", default)]
    directories: Vec<SectionWire>,
}

#[derive(Debug, Deserialize)]
struct SectionWire {
    key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    refreshing: bool,
}

#[derive(Debug, Deserialize)]
struct TracksWire {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<TrackWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackWire {
    rating_key: String,
    title: String,
    /// Artist for a track is the grandparent in Plex's hierarchy.
    grandparent_title: Option<String>,
    /// Album.
    parent_title: Option<String>,
    index: Option<u32>,
    /// Milliseconds.
    duration: Option<u64>,
    #[serde(rename = "Media", default)]
    media: Vec<MediaWire>,
}

#[derive(Debug, Deserialize)]
struct MediaWire {
    #[serde(rename = "Part", default)]
    parts: Vec<PartWire>,
}

#[derive(Debug, Deserialize)]
struct PartWire {
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityWire {
    machine_identifier: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistsWire {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlaylistWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistWire {
    rating_key: String,
    title: String,
}

pub struct PlexClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::ServiceUnavailable {
                service: "plex".to_string(),
            });
        }
        if !status.is_success() {
            return Err(AppError::ServiceError {
                service: "plex".to_string(),
                message: format!("HTTP {}", status),
            });
        }
        Ok(response.json().await?)
    }

    async fn music_sections(&self) -> Result<Vec<SectionWire>> {
        let sections: ContainerWire<SectionsWire> = self.get_json("/library/sections").await?;
        Ok(sections
            .media_container
            .directories
            .into_iter()
            .filter(|d| d.kind == "artist")
            .collect())
    }

    async fn machine_identifier(&self) -> Result<String> {
        let identity: ContainerWire<IdentityWire> = self.get_json("/identity").await?;
        Ok(identity.media_container.machine_identifier)
    }

    async fn find_playlist(&self, name: &str) -> Result<Option<PlaylistWire>> {
        let playlists: ContainerWire<PlaylistsWire> =
            self.get_json("/playlists?playlistType=audio").await?;
        Ok(playlists
            .media_container
            .metadata
            .into_iter()
            .find(|p| p.title == name))
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    fn source(&self) -> ServerSource {
        ServerSource::Plex
    }

    async fn is_connected(&self) -> bool {
        self.get_json::<ContainerWire<IdentityWire>>("/identity")
            .await
            .is_ok()
    }

    async fn list_tracks(&self) -> Result<Vec<LibraryTrack>> {
        let mut tracks = Vec::new();

        for section in self.music_sections().await? {
            // type=10 is the track leaf in Plex's artist hierarchy.
            let path = format!("/library/sections/{}/all?type=10", section.key);
            let listing: ContainerWire<TracksWire> = self.get_json(&path).await?;

            for track in listing.media_container.metadata {
                let file_path = track
                    .media
                    .iter()
                    .flat_map(|m| m.parts.iter())
                    .find_map(|p| p.file.clone());

                tracks.push(LibraryTrack {
                    id: track.rating_key,
                    title: track.title,
                    artist_name: track.grandparent_title.unwrap_or_default(),
                    album_title: track.parent_title,
                    track_number: track.index,
                    duration_ms: track.duration,
                    file_path,
                    server_source: ServerSource::Plex,
                });
            }
        }

        debug!(count = tracks.len(), "Loaded Plex library tracks");
        Ok(tracks)
    }

    async fn trigger_scan(&self) -> Result<()> {
        for section in self.music_sections().await? {
            let path = format!("/library/sections/{}/refresh", section.key);
            let response = self
                .http
                .get(self.url(&path))
                .header("X-Plex-Token", &self.token)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(AppError::ServiceError {
                    service: "plex".to_string(),
                    message: format!("scan trigger returned HTTP {}", response.status()),
                });
            }
        }
        Ok(())
    }

    async fn is_scanning(&self) -> Result<bool> {
        let sections: ContainerWire<SectionsWire> = self.get_json("/library/sections").await?;
        Ok(sections
            .media_container
            .directories
            .iter()
            .any(|d| d.kind == "artist" && d.refreshing))
    }

    async fn create_or_update_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        backup_name: Option<&str>,
    ) -> Result<()> {
        if let Some(existing) = self.find_playlist(name).await? {
            match backup_name {
                Some(backup) => {
                    let path = format!(
                        "/playlists/{}?title={}",
                        existing.rating_key,
                        urlencoding::encode(backup)
                    );
                    let response = self
                        .http
                        .put(self.url(&path))
                        .header("X-Plex-Token", &self.token)
                        .send()
                        .await?;
                    if !response.status().is_success() {
                        warn!(playlist = name, "Failed to rename Plex playlist for backup");
                    }
                }
                None => {
                    let path = format!("/playlists/{}", existing.rating_key);
                    let _ = self
                        .http
                        .delete(self.url(&path))
                        .header("X-Plex-Token", &self.token)
                        .send()
                        .await?;
                }
            }
        }

        let machine = self.machine_identifier().await?;
        let uri = format!(
            "server://{}/com.plexapp.plugins.library/library/metadata/{}",
            machine,
            track_ids.join(",")
        );
        let path = format!(
            "/playlists?type=audio&smart=0&title={}&uri={}",
            urlencoding::encode(name),
            urlencoding::encode(&uri)
        );
        let response = self
            .http
            .post(self.url(&path))
            .header("X-Plex-Token", &self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::ServiceError {
                service: "plex".to_string(),
                message: format!("playlist create returned HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}
