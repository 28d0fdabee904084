//! Parallel playlist analysis against the library index.
//!
//! Lookups run on a bounded pool; per-track results are emitted in
//! completion order, each carrying the playlist index so callers can
//! reassemble ordering.

use crate::events::{CoreEvent, EventBus, TrackAnalyzedPayload};
use crate::models::{Playlist, Track};
use crate::services::cancel::CancelFlag;
use crate::services::library_index::{LibraryIndex, LibraryMatch};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const DEFAULT_CONCURRENCY: usize = 5;

/// One playlist track's lookup outcome.
#[derive(Debug, Clone)]
pub struct TrackAnalysis {
    pub index: usize,
    pub track: Track,
    pub library_match: LibraryMatch,
}

impl TrackAnalysis {
    /// Missing tracks feed the acquisition pipeline.
    pub fn is_missing(&self) -> bool {
        !self.library_match.found()
    }
}

pub struct AnalysisPool {
    concurrency: usize,
}

impl Default for AnalysisPool {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl AnalysisPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Analyze every track of the playlist. Returns results sorted by
    /// playlist index; cancelled lookups are simply absent.
    pub async fn analyze(
        &self,
        playlist: &Playlist,
        index: Arc<LibraryIndex>,
        bus: &EventBus,
        cancel: &CancelFlag,
    ) -> Vec<TrackAnalysis> {
        bus.publish(CoreEvent::AnalysisStarted {
            playlist_id: playlist.id.clone(),
            total: playlist.tracks.len(),
        });

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tasks: Vec<_> = playlist
            .tracks
            .iter()
            .cloned()
            .enumerate()
            .map(|(position, track)| {
                let semaphore = semaphore.clone();
                let index = index.clone();
                let bus = bus.clone();
                let cancel = cancel.clone();
                let playlist_id = playlist.id.clone();

                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok()?;
                    if cancel.is_cancelled() {
                        return None;
                    }

                    let library_match = index.exists(
                        &track.title,
                        track.primary_artist(),
                        LibraryIndex::EXISTENCE_THRESHOLD,
                        None,
                    );

                    bus.publish(CoreEvent::TrackAnalyzed {
                        playlist_id,
                        payload: TrackAnalyzedPayload {
                            index: position,
                            track_id: track.id.clone(),
                            found: library_match.found(),
                            confidence: library_match.confidence,
                        },
                    });

                    Some(TrackAnalysis {
                        index: position,
                        track,
                        library_match,
                    })
                })
            })
            .collect();

        let mut results: Vec<TrackAnalysis> = Vec::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok(Some(analysis)) => results.push(analysis),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Analysis worker panicked"),
            }
        }
        results.sort_by_key(|r| r.index);

        let missing = results.iter().filter(|r| r.is_missing()).count();
        info!(
            playlist = %playlist.name,
            total = playlist.tracks.len(),
            missing = missing,
            "Playlist analysis complete"
        );
        bus.publish(CoreEvent::AnalysisCompleted {
            playlist_id: playlist.id.clone(),
            missing,
        });

        results
    }
}
