//! End-to-end playlist synchronization.
//!
//! Analysis against the library index yields the missing set; YouTube
//! tracks are resolved to canonical catalog identities first; the
//! acquisition supervisor drives the downloads; the sync-status record is
//! rewritten whether or not every track made it.

use crate::clients::MediaServer;
use crate::error::Result;
use crate::models::{Playlist, SourceContext, Track};
use crate::services::acquisition::{AcquisitionSupervisor, RunSummary};
use crate::services::analysis::AnalysisPool;
use crate::services::cancel::CancelFlag;
use crate::services::library_index::LibraryIndex;
use crate::services::resolver::ExternalIdResolver;
use crate::services::sync_status::{SyncRecord, SyncStatusStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What one playlist sync did.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub total_tracks: usize,
    pub already_owned: usize,
    pub missing: usize,
    pub summary: RunSummary,
}

pub struct PlaylistSyncService {
    media_server: Arc<dyn MediaServer>,
    analysis: AnalysisPool,
    resolver: Option<Arc<ExternalIdResolver>>,
    supervisor: Arc<AcquisitionSupervisor>,
    sync_status: Arc<SyncStatusStore>,
}

impl PlaylistSyncService {
    pub fn new(
        media_server: Arc<dyn MediaServer>,
        analysis: AnalysisPool,
        supervisor: Arc<AcquisitionSupervisor>,
        sync_status: Arc<SyncStatusStore>,
    ) -> Self {
        Self {
            media_server,
            analysis,
            resolver: None,
            supervisor,
            sync_status,
        }
    }

    /// Enable YouTube-to-catalog resolution for raw-tagged tracks.
    pub fn with_resolver(mut self, resolver: Arc<ExternalIdResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Swap YouTube-ingested tracks for their canonical catalog identities
    /// where the resolver finds one; unresolved tracks keep their cleaned
    /// ingestion form.
    async fn resolve_youtube_tracks(
        &self,
        tracks: Vec<Track>,
        cancel: &CancelFlag,
    ) -> Vec<Track> {
        let Some(resolver) = &self.resolver else {
            return tracks;
        };

        let raw_items: Vec<(usize, String, String)> = tracks
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match (&t.raw_title, &t.raw_uploader) {
                (Some(title), Some(uploader)) => Some((i, title.clone(), uploader.clone())),
                _ => None,
            })
            .collect();
        if raw_items.is_empty() {
            return tracks;
        }

        let resolved = resolver
            .resolve_batch(
                raw_items
                    .iter()
                    .map(|(_, title, uploader)| (title.clone(), uploader.clone()))
                    .collect(),
                cancel,
            )
            .await;

        let mut tracks = tracks;
        for ((index, ..), resolution) in raw_items.into_iter().zip(resolved) {
            match resolution {
                Some(hit) => {
                    info!(
                        original = %tracks[index].title,
                        resolved = %hit.track.title,
                        confidence = hit.confidence,
                        "Resolved YouTube track to catalog identity"
                    );
                    // Keep the raw fields for provenance.
                    let mut track = hit.track;
                    track.raw_title = tracks[index].raw_title.clone();
                    track.raw_uploader = tracks[index].raw_uploader.clone();
                    tracks[index] = track;
                }
                None => {
                    warn!(
                        title = %tracks[index].title,
                        "No catalog identity found, using ingested metadata"
                    );
                }
            }
        }
        tracks
    }

    /// Run one full sync of a playlist.
    pub async fn sync_playlist(
        &self,
        playlist: &Playlist,
        bus: &crate::events::EventBus,
        cancel: CancelFlag,
    ) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, playlist = %playlist.name, "Starting playlist sync");

        let index = Arc::new(LibraryIndex::load(self.media_server.as_ref()).await?);

        let analyses = self
            .analysis
            .analyze(playlist, index, bus, &cancel)
            .await;
        let already_owned = analyses.iter().filter(|a| !a.is_missing()).count();
        let missing_tracks: Vec<Track> = analyses
            .into_iter()
            .filter(|a| a.is_missing())
            .map(|a| a.track)
            .collect();
        let missing = missing_tracks.len();

        let missing_tracks = self.resolve_youtube_tracks(missing_tracks, &cancel).await;

        let source = SourceContext::playlist(playlist.name.clone(), playlist.id.clone());
        let summary = self
            .supervisor
            .run(missing_tracks, source, cancel.clone())
            .await?;

        // The record is written even when tracks failed: the sync itself
        // happened and the snapshot was processed.
        self.sync_status
            .update(
                &playlist.id,
                SyncRecord {
                    name: playlist.name.clone(),
                    owner: playlist.owner.clone(),
                    snapshot_id: playlist.snapshot_id.clone(),
                    last_synced: Utc::now(),
                },
            )
            .await?;

        info!(
            playlist = %playlist.name,
            total = playlist.tracks.len(),
            owned = already_owned,
            missing = missing,
            completed = summary.completed,
            failed = summary.failed,
            "Playlist sync finished"
        );

        Ok(SyncReport {
            run_id,
            total_tracks: playlist.tracks.len(),
            already_owned,
            missing,
            summary,
        })
    }
}
