//! Client for the slskd transfer daemon.
//!
//! The transfer table comes back as a tree of user → directories → files,
//! but some terminal states surface as a flat user → files list instead;
//! consumers get both layouts flattened into [`TransferRow`]s.

use crate::error::{AppError, Result};
use crate::models::{SearchResponse, SharedFile, TransferRow, TransferState};
use crate::recovery::CircuitBreaker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Abstract daemon surface, mockable in tests.
#[async_trait]
pub trait TransferDaemon: Send + Sync {
    /// Whether the daemon answers at all. A dead daemon aborts the run
    /// before any dispatch.
    async fn health_check(&self) -> bool;

    /// Run a search to completion and return the peer responses.
    async fn search(&self, query: &str) -> Result<Vec<SearchResponse>>;

    /// Hand a file to the daemon for download. The daemon assigns transfer
    /// ids asynchronously, so the id may not be known yet.
    async fn enqueue_download(
        &self,
        username: &str,
        filename: &str,
        size_bytes: u64,
    ) -> Result<Option<String>>;

    /// Snapshot the entire transfer table, both layouts flattened.
    async fn downloads_snapshot(&self) -> Result<Vec<TransferRow>>;

    /// Cancel a transfer. `remove=false` keeps the row so the poller can
    /// observe the cancellation.
    async fn cancel_download(&self, username: &str, transfer_id: &str, remove: bool)
        -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSearchRequest<'a> {
    search_text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSearchResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchStatus {
    #[serde(default)]
    is_complete: bool,
    #[serde(default)]
    file_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponseWire {
    username: String,
    #[serde(default)]
    files: Vec<SearchFileWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchFileWire {
    filename: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    bit_rate: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueFileRequest<'a> {
    filename: &'a str,
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserTransfersWire {
    username: String,
    #[serde(default)]
    directories: Vec<DirectoryTransfersWire>,
    #[serde(default)]
    files: Vec<TransferFileWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryTransfersWire {
    #[serde(default)]
    files: Vec<TransferFileWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferFileWire {
    #[serde(default)]
    id: Option<String>,
    filename: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    percent_complete: f64,
    #[serde(default)]
    bytes_transferred: u64,
    #[serde(default)]
    size: u64,
}

fn normalize_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// reqwest-backed slskd client.
pub struct SlskdClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    search_poll_interval: Duration,
    search_timeout: Duration,
    breaker: Mutex<CircuitBreaker>,
}

impl SlskdClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            search_poll_interval: Duration::from_millis(500),
            search_timeout: Duration::from_secs(30),
            breaker: Mutex::new(CircuitBreaker::new("slskd", 5, Duration::from_secs(30))),
        })
    }

    async fn guard(&self) -> Result<()> {
        self.breaker.lock().await.try_acquire()
    }

    async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        let mut breaker = self.breaker.lock().await;
        match &result {
            Ok(_) => breaker.record_success(),
            Err(e) if e.is_transient() => breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    pub fn with_search_timing(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.search_poll_interval = poll_interval;
        self.search_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.base_url, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("X-API-Key", &self.api_key)
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 {
            return Err(AppError::RateLimited {
                service: "slskd".to_string(),
                retry_after: None,
            });
        }
        if status.is_server_error() {
            return Err(AppError::ServiceUnavailable {
                service: "slskd".to_string(),
            });
        }
        Err(AppError::ServiceError {
            service: "slskd".to_string(),
            message: format!("HTTP {}: {}", status, body),
        })
    }

    async fn start_search(&self, query: &str) -> Result<String> {
        let response = self
            .request(self.http.post(self.url("searches")))
            .json(&StartSearchRequest { search_text: query })
            .send()
            .await?;
        let response = self.check_status(response).await?;
        let started: StartSearchResponse = response.json().await?;
        Ok(started.id)
    }

    async fn search_status(&self, id: &str) -> Result<SearchStatus> {
        let response = self
            .request(self.http.get(self.url(&format!("searches/{}", id))))
            .send()
            .await?;
        let response = self.check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn search_responses(&self, id: &str) -> Result<Vec<SearchResponse>> {
        let response = self
            .request(
                self.http
                    .get(self.url(&format!("searches/{}/responses", id))),
            )
            .send()
            .await?;
        let response = self.check_status(response).await?;
        let wire: Vec<SearchResponseWire> = response.json().await?;
        Ok(wire
            .into_iter()
            .map(|r| SearchResponse {
                username: r.username,
                files: r
                    .files
                    .into_iter()
                    .map(|f| SharedFile {
                        filename: normalize_slashes(&f.filename),
                        size_bytes: f.size,
                        bitrate_kbps: f.bit_rate,
                    })
                    .collect(),
            })
            .collect())
    }
}

/// Flatten one user's transfer subtree; both the nested directory layout
/// and the flat file list occur in practice.
fn flatten_user_transfers(user: UserTransfersWire) -> Vec<TransferRow> {
    let username = user.username;
    let mut rows = Vec::new();

    let mut push = |file: TransferFileWire| {
        rows.push(TransferRow {
            id: file.id,
            username: username.clone(),
            filename: normalize_slashes(&file.filename),
            state: TransferState::classify(&file.state),
            raw_state: file.state,
            percent_complete: file.percent_complete,
            bytes_transferred: file.bytes_transferred,
            size_bytes: file.size,
        });
    };

    for directory in user.directories {
        for file in directory.files {
            push(file);
        }
    }
    for file in user.files {
        push(file);
    }

    rows
}

#[async_trait]
impl TransferDaemon for SlskdClient {
    async fn health_check(&self) -> bool {
        let url = self.url("application");
        match self.request(self.http.get(url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResponse>> {
        self.guard().await?;
        let started = self.start_search(query).await;
        let id = self.observe(started).await?;
        debug!(search_id = %id, query = %query, "Search started");

        let deadline = tokio::time::Instant::now() + self.search_timeout;
        loop {
            sleep(self.search_poll_interval).await;
            let status = self.search_status(&id).await?;
            if status.is_complete {
                debug!(search_id = %id, files = status.file_count, "Search complete");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(search_id = %id, "Search timed out, collecting partial responses");
                break;
            }
        }

        self.search_responses(&id).await
    }

    async fn enqueue_download(
        &self,
        username: &str,
        filename: &str,
        size_bytes: u64,
    ) -> Result<Option<String>> {
        let response = self
            .request(self.http.post(self.url(&format!(
                "transfers/downloads/{}",
                urlencoding::encode(username)
            ))))
            .json(&vec![EnqueueFileRequest {
                filename,
                size: size_bytes,
            }])
            .send()
            .await?;
        self.check_status(response).await?;
        // slskd assigns transfer ids asynchronously; the poller adopts the
        // id from the transfer table by filename match.
        Ok(None)
    }

    async fn downloads_snapshot(&self) -> Result<Vec<TransferRow>> {
        self.guard().await?;
        let snapshot: Result<Vec<TransferRow>> = async {
            let response = self
                .request(self.http.get(self.url("transfers/downloads")))
                .send()
                .await?;
            let response = self.check_status(response).await?;
            let users: Vec<UserTransfersWire> = response.json().await?;
            Ok(users.into_iter().flat_map(flatten_user_transfers).collect())
        }
        .await;
        self.observe(snapshot).await
    }

    async fn cancel_download(
        &self,
        username: &str,
        transfer_id: &str,
        remove: bool,
    ) -> Result<()> {
        let response = self
            .request(self.http.delete(self.url(&format!(
                "transfers/downloads/{}/{}",
                urlencoding::encode(username),
                urlencoding::encode(transfer_id)
            ))))
            .query(&[("remove", remove)])
            .send()
            .await?;
        self.check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_both_tree_layouts() {
        let wire: Vec<UserTransfersWire> = serde_json::from_value(serde_json::json!([
            {
                "username": "alice",
                "directories": [
                    {
                        "directory": "M83\\Hurry Up",
                        "files": [
                            {
                                "id": "abc",
                                "filename": "M83\\Hurry Up\\01 Midnight City.flac",
                                "state": "InProgress",
                                "percentComplete": 50.0,
                                "bytesTransferred": 500,
                                "size": 1000
                            }
                        ]
                    }
                ]
            },
            {
                "username": "bob",
                "files": [
                    {
                        "filename": "bob/song.mp3",
                        "state": "Completed, Succeeded",
                        "percentComplete": 100.0,
                        "bytesTransferred": 1000,
                        "size": 1000
                    }
                ]
            }
        ]))
        .unwrap();

        let rows: Vec<TransferRow> = wire.into_iter().flat_map(flatten_user_transfers).collect();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].username, "alice");
        assert_eq!(rows[0].filename, "M83/Hurry Up/01 Midnight City.flac");
        assert_eq!(rows[0].state, TransferState::InProgress);
        assert_eq!(rows[0].id.as_deref(), Some("abc"));

        assert_eq!(rows[1].username, "bob");
        assert_eq!(rows[1].state, TransferState::Completed);
        assert_eq!(rows[1].id, None);
    }

    #[test]
    fn cancelled_marker_beats_completed_marker() {
        let file = TransferFileWire {
            id: Some("x".into()),
            filename: "a/b.flac".into(),
            state: "Completed, Cancelled".into(),
            percent_complete: 100.0,
            bytes_transferred: 10,
            size: 10,
        };
        let user = UserTransfersWire {
            username: "u".into(),
            directories: vec![],
            files: vec![file],
        };
        let rows = flatten_user_transfers(user);
        assert_eq!(rows[0].state, TransferState::Cancelled);
    }
}
