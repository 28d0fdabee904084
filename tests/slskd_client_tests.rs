//! Integration tests for the slskd client against a mocked daemon API.

use playlist_sync_engine::clients::{SlskdClient, TransferDaemon};
use playlist_sync_engine::error::AppError;
use playlist_sync_engine::models::TransferState;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> SlskdClient {
    SlskdClient::new(server.uri(), "test-key")
        .unwrap()
        .with_search_timing(Duration::from_millis(5), Duration::from_secs(2))
}

#[tokio::test]
async fn search_runs_to_completion_and_collects_responses() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/searches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "s-1"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v0/searches/s-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"isComplete": true, "fileCount": 2})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v0/searches/s-1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "username": "alice",
                "files": [
                    {"filename": "M83\\Hurry Up\\01 Midnight City.flac", "size": 31000000},
                    {"filename": "M83\\Hurry Up\\02 Reunion.mp3", "size": 9000000, "bitRate": 320}
                ]
            }
        ])))
        .mount(&server)
        .await;

    let responses = client(&server).search("M83 Midnight City").await.unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].username, "alice");
    // Peer paths are forward-slash normalized on ingestion.
    assert_eq!(
        responses[0].files[0].filename,
        "M83/Hurry Up/01 Midnight City.flac"
    );
    assert_eq!(responses[0].files[1].bitrate_kbps, Some(320));
}

#[tokio::test]
async fn snapshot_flattens_directory_and_flat_layouts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/transfers/downloads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "username": "alice",
                "directories": [
                    {
                        "directory": "M83\\Hurry Up",
                        "files": [
                            {
                                "id": "t-1",
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
                        "id": "t-2",
                        "filename": "bob\\oldies\\Yesterday.mp3",
                        "state": "Completed, Cancelled",
                        "percentComplete": 100.0,
                        "bytesTransferred": 1000,
                        "size": 1000
                    }
                ]
            }
        ])))
        .mount(&server)
        .await;

    let rows = client(&server).downloads_snapshot().await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].state, TransferState::InProgress);
    assert_eq!(rows[0].filename, "M83/Hurry Up/01 Midnight City.flac");
    // Cancellation marker outranks the completion marker.
    assert_eq!(rows[1].state, TransferState::Cancelled);
}

#[tokio::test]
async fn enqueue_posts_file_to_peer_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/transfers/downloads/alice"))
        .and(body_json(json!([
            {"filename": "M83/01 Midnight City.flac", "size": 31000000}
        ])))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let transfer_id = client(&server)
        .enqueue_download("alice", "M83/01 Midnight City.flac", 31_000_000)
        .await
        .unwrap();
    // The daemon assigns ids asynchronously.
    assert_eq!(transfer_id, None);
}

#[tokio::test]
async fn cancel_sends_delete_with_remove_flag() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v0/transfers/downloads/alice/t-1"))
        .and(query_param("remove", "false"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .cancel_download("alice", "t-1", false)
        .await
        .unwrap();
}

#[tokio::test]
async fn daemon_errors_surface_as_service_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/transfers/downloads"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client(&server).downloads_snapshot().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn repeated_daemon_failures_open_the_circuit() {
    let server = MockServer::start().await;

    // Exactly five requests may reach the daemon; the breaker must stop
    // the sixth before it leaves the client.
    Mock::given(method("GET"))
        .and(path("/api/v0/transfers/downloads"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    let client = client(&server);
    for _ in 0..5 {
        assert!(client.downloads_snapshot().await.is_err());
    }

    let result = client.downloads_snapshot().await;
    assert!(matches!(
        result,
        Err(AppError::ServiceUnavailable { .. })
    ));
}

#[tokio::test]
async fn health_check_false_when_daemon_down() {
    let server = MockServer::start().await;
    // No mocks mounted: every request 404s.
    assert!(!client(&server).health_check().await);
}
