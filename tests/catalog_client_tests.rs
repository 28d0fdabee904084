//! Integration tests for the streaming-catalog client against a mocked
//! Spotify-shaped API.

use playlist_sync_engine::clients::{AlbumKind, SpotifyCatalog, StaticToken, StreamingCatalog};
use playlist_sync_engine::error::AppError;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> SpotifyCatalog {
    SpotifyCatalog::with_base_url(server.uri(), Arc::new(StaticToken("token-1".to_string())))
        .unwrap()
}

#[tokio::test]
async fn get_playlist_follows_track_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl1"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pl1",
            "name": "Road Trip",
            "snapshot_id": "snap-1",
            "owner": {"display_name": "tester"},
            "tracks": {
                "items": [
                    {
                        "track": {
                            "id": "t1",
                            "name": "Midnight City",
                            "artists": [{"name": "M83"}],
                            "album": {"name": "Hurry Up, We're Dreaming", "album_type": "album", "total_tracks": 22},
                            "duration_ms": 244000
                        }
                    }
                ],
                "next": format!("{}/v1/playlists/pl1/tracks?offset=100", server.uri())
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/playlists/pl1/tracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {
                    "track": {
                        "id": "t2",
                        "name": "Reunion",
                        "artists": [{"name": "M83"}],
                        "album": {"name": "Hurry Up, We're Dreaming", "album_type": "album", "total_tracks": 22},
                        "duration_ms": 355000
                    }
                },
                {"track": null}
            ],
            "next": null
        })))
        .mount(&server)
        .await;

    let playlist = client(&server).get_playlist("pl1").await.unwrap();

    assert_eq!(playlist.name, "Road Trip");
    assert_eq!(playlist.snapshot_id.as_deref(), Some("snap-1"));
    assert_eq!(playlist.owner.as_deref(), Some("tester"));
    // Null track rows (removed episodes etc.) are skipped.
    assert_eq!(playlist.tracks.len(), 2);
    assert_eq!(playlist.tracks[0].primary_artist(), "M83");
    assert_eq!(playlist.tracks[1].title, "Reunion");
}

#[tokio::test]
async fn search_carries_album_metadata_for_ranking() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("type", "track"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tracks": {
                "items": [
                    {
                        "id": "t1",
                        "name": "Midnight City",
                        "artists": [{"name": "M83"}],
                        "album": {"name": "Hurry Up, We're Dreaming", "album_type": "album", "total_tracks": 22},
                        "duration_ms": 244000
                    },
                    {
                        "id": "t2",
                        "name": "Midnight City",
                        "artists": [{"name": "M83"}],
                        "album": {"name": "Midnight City", "album_type": "single", "total_tracks": 1},
                        "duration_ms": 244000
                    }
                ],
                "next": null
            }
        })))
        .mount(&server)
        .await;

    let results = client(&server)
        .search_tracks("M83 Midnight City", 10)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].album_kind, Some(AlbumKind::Album));
    assert_eq!(results[0].album_total_tracks, Some(22));
    assert_eq!(results[1].album_kind, Some(AlbumKind::Single));
    assert!(results[0].album_preference_bonus() > results[1].album_preference_bonus());
}

#[tokio::test]
async fn rate_limit_is_reported_with_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("retry-after", "7"),
        )
        .mount(&server)
        .await;

    let result = client(&server).search_tracks("anything", 5).await;
    match result {
        Err(AppError::RateLimited {
            service,
            retry_after,
        }) => {
            assert_eq!(service, "spotify");
            assert_eq!(retry_after, Some(7));
        }
        other => panic!("expected rate limit error, got {:?}", other.map(|v| v.len())),
    }
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;

    // Two failures, then success: within the 3-attempt retry policy.
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tracks": {"items": [], "next": null}
        })))
        .mount(&server)
        .await;

    let results = client(&server).search_tracks("flaky", 5).await.unwrap();
    assert!(results.is_empty());
}
