//! In-memory index over the local library, built once per run.
//!
//! Rows are bucketed by every token of the normalized artist name so a
//! lookup scores a shortlist instead of the whole library. The index is a
//! read-only value after build.

use crate::clients::MediaServer;
use crate::error::Result;
use crate::matching::{normalize_for_match, score_tracks, ScoreInput};
use crate::models::{LibraryTrack, ServerSource};
use crate::recovery::{retry_external_operation, RetryConfig};
use std::collections::HashMap;
use tracing::{debug, info};

/// Default confidence floor for `exists`. The analysis gate uses
/// [`LibraryIndex::EXISTENCE_THRESHOLD`] instead.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.70;

/// Result of a library lookup.
#[derive(Debug, Clone)]
pub struct LibraryMatch {
    pub track: Option<LibraryTrack>,
    pub confidence: f64,
}

impl LibraryMatch {
    fn miss() -> Self {
        Self {
            track: None,
            confidence: 0.0,
        }
    }

    pub fn found(&self) -> bool {
        self.track.is_some()
    }
}

pub struct LibraryIndex {
    tracks: Vec<LibraryTrack>,
    /// Normalized artist token -> row indices.
    artist_buckets: HashMap<String, Vec<usize>>,
}

impl LibraryIndex {
    /// The gate a playlist track must clear to count as already owned.
    pub const EXISTENCE_THRESHOLD: f64 = 0.80;

    /// Bulk-load the active media server's tracks, retrying transient
    /// failures inline.
    pub async fn load(server: &dyn MediaServer) -> Result<Self> {
        let tracks = retry_external_operation(
            || server.list_tracks(),
            RetryConfig::remote_lookup(),
            "library_list_tracks",
        )
        .await?;
        info!(
            server = %server.source(),
            count = tracks.len(),
            "Built library index"
        );
        Ok(Self::from_tracks(tracks))
    }

    pub fn from_tracks(tracks: Vec<LibraryTrack>) -> Self {
        let mut artist_buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (row, track) in tracks.iter().enumerate() {
            for token in normalize_for_match(&track.artist_name).split_whitespace() {
                artist_buckets.entry(token.to_string()).or_default().push(row);
            }
        }
        Self {
            tracks,
            artist_buckets,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn shortlist(&self, artist: &str) -> Vec<usize> {
        let mut rows: Vec<usize> = Vec::new();
        for token in normalize_for_match(artist).split_whitespace() {
            if let Some(bucket) = self.artist_buckets.get(token) {
                rows.extend_from_slice(bucket);
            }
        }
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    /// Find the best library match at or above `min_confidence`.
    ///
    /// An empty expected artist compares on title alone with the floor
    /// raised by 0.05.
    pub fn exists(
        &self,
        title: &str,
        artist: &str,
        min_confidence: f64,
        server_filter: Option<ServerSource>,
    ) -> LibraryMatch {
        if self.tracks.is_empty() {
            return LibraryMatch::miss();
        }

        let title_only = artist.trim().is_empty();
        let min_confidence = if title_only {
            min_confidence + 0.05
        } else {
            min_confidence
        };

        let candidate_rows: Vec<usize> = if title_only {
            (0..self.tracks.len()).collect()
        } else {
            let shortlist = self.shortlist(artist);
            if shortlist.is_empty() {
                // Fuzzy artists can miss every bucket; fall back to a full
                // scan rather than reporting a false miss.
                (0..self.tracks.len()).collect()
            } else {
                shortlist
            }
        };

        let mut best: Option<(usize, f64)> = None;
        for row in candidate_rows {
            let track = &self.tracks[row];
            if let Some(filter) = server_filter {
                if track.server_source != filter {
                    continue;
                }
            }

            let expected = ScoreInput::new(title, artist).with_duration_ms(None);
            let candidate = ScoreInput::new(&track.title, &track.artist_name);
            let score = score_tracks(&expected, &candidate, true);
            let confidence = if title_only {
                score.title_similarity - score.version_penalty
            } else {
                score.effective_confidence()
            };

            if best.map(|(_, c)| confidence > c).unwrap_or(true) {
                best = Some((row, confidence));
            }
        }

        match best {
            Some((row, confidence)) if confidence >= min_confidence => {
                debug!(
                    title = title,
                    artist = artist,
                    matched = %self.tracks[row].title,
                    confidence = confidence,
                    "Library hit"
                );
                LibraryMatch {
                    track: Some(self.tracks[row].clone()),
                    confidence,
                }
            }
            _ => LibraryMatch::miss(),
        }
    }
}
