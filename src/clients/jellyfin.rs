//! Jellyfin backend for the media-server interface.

use crate::clients::media_server::MediaServer;
use crate::error::{AppError, Result};
use crate::models::{LibraryTrack, ServerSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PAGE_SIZE: u32 = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPageWire {
    #[serde(default)]
    items: Vec<ItemWire>,
    #[serde(default)]
    total_record_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemWire {
    id: String,
    name: String,
    #[serde(default)]
    album_artist: Option<String>,
    #[serde(default)]
    artists: Vec<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    index_number: Option<u32>,
    /// Jellyfin reports runtime in 100 ns ticks.
    #[serde(default)]
    run_time_ticks: Option<u64>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScheduledTaskWire {
    #[serde(default)]
    key: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreatePlaylistRequest<'a> {
    name: &'a str,
    ids: &'a [String],
    media_type: &'a str,
}

pub struct JellyfinClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl JellyfinClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("X-Emby-Token", &self.api_key)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(self.http.get(self.url(path))).send().await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AppError::ServiceUnavailable {
                service: "jellyfin".to_string(),
            });
        }
        if !status.is_success() {
            return Err(AppError::ServiceError {
                service: "jellyfin".to_string(),
                message: format!("HTTP {}", status),
            });
        }
        Ok(response.json().await?)
    }

    async fn find_playlist_id(&self, name: &str) -> Result<Option<String>> {
        let path = format!(
            "/Items?IncludeItemTypes=Playlist&Recursive=true&SearchTerm={}",
            urlencoding::encode(name)
        );
        let page: ItemsPageWire = self.get_json(&path).await?;
        Ok(page
            .items
            .into_iter()
            .find(|item| item.name == name)
            .map(|item| item.id))
    }
}

#[async_trait]
impl MediaServer for JellyfinClient {
    fn source(&self) -> ServerSource {
        ServerSource::Jellyfin
    }

    async fn is_connected(&self) -> bool {
        match self.request(self.http.get(self.url("/System/Info"))).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list_tracks(&self) -> Result<Vec<LibraryTrack>> {
        let mut tracks = Vec::new();
        let mut start_index = 0u32;

        loop {
            let path = format!(
                "/Items?IncludeItemTypes=Audio&Recursive=true&Fields=Path&StartIndex={}&Limit={}",
                start_index, PAGE_SIZE
            );
            let page: ItemsPageWire = self.get_json(&path).await?;
            let fetched = page.items.len() as u32;

            for item in page.items {
                let artist_name = item
                    .artists
                    .first()
                    .cloned()
                    .or(item.album_artist)
                    .unwrap_or_default();

                tracks.push(LibraryTrack {
                    id: item.id,
                    title: item.name,
                    artist_name,
                    album_title: item.album,
                    track_number: item.index_number,
                    duration_ms: item.run_time_ticks.map(|t| t / 10_000),
                    file_path: item.path,
                    server_source: ServerSource::Jellyfin,
                });
            }

            start_index += fetched;
            if fetched < PAGE_SIZE || start_index >= page.total_record_count {
                break;
            }
        }

        debug!(count = tracks.len(), "Loaded Jellyfin library tracks");
        Ok(tracks)
    }

    async fn trigger_scan(&self) -> Result<()> {
        let response = self
            .request(self.http.post(self.url("/Library/Refresh")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::ServiceError {
                service: "jellyfin".to_string(),
                message: format!("scan trigger returned HTTP {}", response.status()),
            });
        }
        Ok(())
    }

    async fn is_scanning(&self) -> Result<bool> {
        let tasks: Vec<ScheduledTaskWire> = self.get_json("/ScheduledTasks").await?;
        Ok(tasks
            .iter()
            .any(|t| t.key == "RefreshLibrary" && t.state == "Running"))
    }

    async fn create_or_update_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        backup_name: Option<&str>,
    ) -> Result<()> {
        if let Some(existing_id) = self.find_playlist_id(name).await? {
            match backup_name {
                Some(backup) => {
                    // Keep the old list under the backup name.
                    let body = serde_json::json!({ "Name": backup });
                    let path = format!("/Items/{}", existing_id);
                    let _ = self
                        .request(self.http.post(self.url(&path)))
                        .json(&body)
                        .send()
                        .await?;
                }
                None => {
                    let path = format!("/Items/{}", existing_id);
                    let _ = self.request(self.http.delete(self.url(&path))).send().await?;
                }
            }
        }

        let response = self
            .request(self.http.post(self.url("/Playlists")))
            .json(&CreatePlaylistRequest {
                name,
                ids: track_ids,
                media_type: "Audio",
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::ServiceError {
                service: "jellyfin".to_string(),
                message: format!("playlist create returned HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_ticks_convert_to_millis() {
        let json = serde_json::json!({
            "Items": [
                {
                    "Id": "abc",
                    "Name": "Midnight City",
                    "Artists": ["M83"],
                    "Album": "Hurry Up, We're Dreaming",
                    "IndexNumber": 1,
                    "RunTimeTicks": 2_440_000_000u64,
                    "Path": "/music/M83/01.flac"
                }
            ],
            "TotalRecordCount": 1
        });
        let page: ItemsPageWire = serde_json::from_value(json).unwrap();
        let item = &page.items[0];
        assert_eq!(item.run_time_ticks.map(|t| t / 10_000), Some(244_000));
        assert_eq!(item.artists[0], "M83");
    }

    #[test]
    fn scheduled_task_detects_running_scan() {
        let json = serde_json::json!([
            {"Key": "RefreshLibrary", "State": "Running"},
            {"Key": "Backup", "State": "Idle"}
        ]);
        let tasks: Vec<ScheduledTaskWire> = serde_json::from_value(json).unwrap();
        assert!(tasks
            .iter()
            .any(|t| t.key == "RefreshLibrary" && t.state == "Running"));
    }
}
