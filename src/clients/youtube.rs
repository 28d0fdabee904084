//! YouTube ingestion: turns yt-dlp playlist dumps into source playlists.
//!
//! Each entry keeps its raw title/uploader verbatim for the resolver's
//! fallback queries, alongside a minimally-cleaned title and artist guess.
//! Durations are frequently absent and stay absent.

use crate::matching::{clean_youtube_title, clean_youtube_uploader};
use crate::models::{Playlist, Track};
use serde::Deserialize;

/// One playlist entry as produced by `yt-dlp --dump-json`.
#[derive(Debug, Clone, Deserialize)]
pub struct YoutubeEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    /// Seconds; often missing on flat extractions.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub webpage_url: Option<String>,
}

impl YoutubeEntry {
    fn uploader_name(&self) -> Option<&str> {
        self.uploader
            .as_deref()
            .or(self.channel.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Parse concatenated JSON lines from `yt-dlp --dump-json`, skipping
/// non-video rows.
pub fn parse_dump_json(dump: &str) -> Vec<YoutubeEntry> {
    dump.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<YoutubeEntry>(line).ok())
        .collect()
}

fn track_from_entry(entry: YoutubeEntry) -> Track {
    let uploader = entry.uploader_name().map(|s| s.to_string());
    let title = clean_youtube_title(&entry.title, uploader.as_deref());
    let artist = uploader
        .as_deref()
        .map(clean_youtube_uploader)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Unknown Artist".to_string());

    let mut track = Track::new(entry.id.clone(), title, vec![artist]);
    track.duration_ms = entry.duration.map(|s| (s * 1000.0) as u64);
    track.raw_title = Some(entry.title);
    track.raw_uploader = uploader;
    if let Some(url) = entry.webpage_url {
        track.external_urls.insert("youtube".to_string(), url);
    }
    track
}

/// Build a source playlist from ingested entries. YouTube has no snapshot
/// token, so the playlist carries none and always reads as needing sync.
pub fn playlist_from_entries(
    playlist_id: impl Into<String>,
    name: impl Into<String>,
    entries: Vec<YoutubeEntry>,
) -> Playlist {
    Playlist {
        id: playlist_id.into(),
        name: name.into(),
        snapshot_id: None,
        owner: None,
        tracks: entries.into_iter().map(track_from_entry).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_maps_to_track_with_raw_fields() {
        let entry = YoutubeEntry {
            id: "abc123".to_string(),
            title: "M83 - Midnight City (Official Video)".to_string(),
            uploader: Some("M83VEVO".to_string()),
            channel: None,
            duration: Some(244.0),
            webpage_url: Some("https://youtube.com/watch?v=abc123".to_string()),
        };

        let playlist = playlist_from_entries("pl1", "Liked videos", vec![entry]);
        let track = &playlist.tracks[0];

        assert_eq!(track.title, "Midnight City");
        assert_eq!(track.artists, vec!["M83".to_string()]);
        assert_eq!(
            track.raw_title.as_deref(),
            Some("M83 - Midnight City (Official Video)")
        );
        assert_eq!(track.raw_uploader.as_deref(), Some("M83VEVO"));
        assert_eq!(track.duration_ms, Some(244_000));
        assert!(playlist.snapshot_id.is_none());
    }

    #[test]
    fn missing_duration_stays_missing() {
        let entry = YoutubeEntry {
            id: "x".to_string(),
            title: "Some Song".to_string(),
            uploader: None,
            channel: Some("Some Channel".to_string()),
            duration: None,
            webpage_url: None,
        };
        let playlist = playlist_from_entries("pl", "p", vec![entry]);
        assert_eq!(playlist.tracks[0].duration_ms, None);
        assert_eq!(playlist.tracks[0].artists[0], "Some Channel");
    }

    #[test]
    fn dump_json_skips_garbage_lines() {
        let dump = r#"{"id":"a","title":"Song A","uploader":"Chan"}
not json
{"id":"b","title":"Song B"}"#;
        let entries = parse_dump_json(dump);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].id, "b");
    }
}
