use crate::models::{Candidate, Track};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::time::Instant;

/// Classified state of a daemon transfer row.
///
/// Raw daemon state strings are free-form and some builds concatenate
/// several markers ("Completed, Cancelled"), so classification is by
/// priority: cancellation first, then failure, then completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn classify(raw: &str) -> Self {
        let s = raw.to_ascii_lowercase();
        if s.contains("cancel") {
            TransferState::Cancelled
        } else if s.contains("fail") || s.contains("error") {
            TransferState::Failed
        } else if s.contains("complet") || s.contains("succe") {
            TransferState::Completed
        } else if s.contains("progress") || s.contains("transferring") {
            TransferState::InProgress
        } else {
            TransferState::Queued
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }
}

/// One flattened row from the daemon's transfer table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRow {
    pub id: Option<String>,
    pub username: String,
    pub filename: String,
    pub state: TransferState,
    pub raw_state: String,
    pub percent_complete: f64,
    pub bytes_transferred: u64,
    pub size_bytes: u64,
}

/// Lifecycle of a tracked download. Transitions for one download are
/// strictly linear; the controller processes them on a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    /// Running query `query_index` against the daemon.
    Searching { query_index: usize },
    /// A candidate has been handed to the daemon, no row observed yet.
    Dispatching,
    Queued,
    Downloading,
    /// Transfer finished, fingerprint verification outstanding.
    Verifying,
    Completed,
    Retrying,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// Per-track download record tracked by the acquisition controller.
#[derive(Debug, Clone)]
pub struct ActiveDownload {
    /// Stable integer within a run.
    pub download_index: u64,
    pub track: Track,
    pub candidate: Candidate,
    /// Assigned by the daemon; may be discovered later via filename match.
    pub transfer_id: Option<String>,
    /// Every `(username, filename)` pair ever dispatched for this track.
    pub used_sources: HashSet<(String, String)>,
    /// Remaining alternates from the successful search query.
    pub candidates_cache: Vec<Candidate>,
    pub retry_count: u32,
    pub queued_start_time: Option<Instant>,
    pub downloading_start_time: Option<Instant>,
    /// Consecutive polls in which the daemon reported no matching row.
    pub api_missing_count: u32,
}

impl ActiveDownload {
    pub fn new(download_index: u64, track: Track, candidate: Candidate) -> Self {
        let mut used_sources = HashSet::new();
        used_sources.insert(candidate.source_key());
        Self {
            download_index,
            track,
            candidate,
            transfer_id: None,
            used_sources,
            candidates_cache: Vec::new(),
            retry_count: 0,
            queued_start_time: None,
            downloading_start_time: None,
            api_missing_count: 0,
        }
    }

    /// Pick the next cached candidate whose source has not been tried yet.
    pub fn next_unused_candidate(&self) -> Option<Candidate> {
        self.candidates_cache
            .iter()
            .find(|c| !self.used_sources.contains(&c.source_key()))
            .cloned()
    }

    /// Swap in a new candidate for a retry, recording its source as used
    /// and resetting per-transfer bookkeeping.
    pub fn adopt_candidate(&mut self, candidate: Candidate) {
        self.used_sources.insert(candidate.source_key());
        self.candidate = candidate;
        self.transfer_id = None;
        self.queued_start_time = None;
        self.downloading_start_time = None;
        self.api_missing_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioQuality, VersionType};

    fn candidate(username: &str, filename: &str) -> Candidate {
        Candidate {
            filename: filename.to_string(),
            username: username.to_string(),
            size_bytes: 1000,
            quality: AudioQuality::Flac,
            bitrate_kbps: None,
            confidence: 0.9,
            version_type: VersionType::Original,
            version_penalty: 0.0,
        }
    }

    #[test]
    fn classify_priority_order() {
        // Cancellation markers win even when combined with completion.
        assert_eq!(
            TransferState::classify("Completed, Cancelled"),
            TransferState::Cancelled
        );
        assert_eq!(TransferState::classify("Canceled"), TransferState::Cancelled);
        assert_eq!(
            TransferState::classify("Completed, Errored"),
            TransferState::Failed
        );
        assert_eq!(
            TransferState::classify("Completed, Succeeded"),
            TransferState::Completed
        );
        assert_eq!(
            TransferState::classify("InProgress"),
            TransferState::InProgress
        );
        assert_eq!(
            TransferState::classify("Queued, Remotely"),
            TransferState::Queued
        );
        assert_eq!(TransferState::classify(""), TransferState::Queued);
    }

    #[test]
    fn next_candidate_skips_used_sources() {
        let track = Track::new("t1", "Song", vec!["Artist".to_string()]);
        let mut download = ActiveDownload::new(1, track, candidate("alice", "a/song.flac"));
        download.candidates_cache = vec![
            candidate("alice", "a/song.flac"),
            candidate("bob", "b/song.flac"),
        ];

        let next = download.next_unused_candidate().unwrap();
        assert_eq!(next.username, "bob");

        download.adopt_candidate(next);
        assert!(download.next_unused_candidate().is_none());
    }
}
