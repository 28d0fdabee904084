//! Maps raw YouTube (uploader, title) pairs to canonical catalog tracks.
//!
//! Four fallback strategies run in order, each with its own acceptance
//! threshold; raw strategies run the uncleaned strings through unchanged
//! because the cleaner sometimes destroys the very tokens that match.
//! YouTube occasionally inverts uploader and title, hence the swap.

use crate::clients::{CatalogTrack, StreamingCatalog};
use crate::error::Result;
use crate::matching::{clean_youtube_title, clean_youtube_uploader, score_tracks, ScoreInput};
use crate::models::Track;
use crate::services::cancel::CancelFlag;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

const CANDIDATES_PER_STRATEGY: u32 = 10;
const DEFAULT_WORKERS: usize = 3;
/// Dispatch stagger to respect the catalog's published rate limit.
const DISPATCH_STAGGER: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    Cleaned,
    Swapped,
    Raw,
    TitleFirstRaw,
}

impl ResolveStrategy {
    const CHAIN: [ResolveStrategy; 4] = [
        ResolveStrategy::Cleaned,
        ResolveStrategy::Swapped,
        ResolveStrategy::Raw,
        ResolveStrategy::TitleFirstRaw,
    ];

    fn threshold(&self) -> f64 {
        match self {
            ResolveStrategy::Cleaned | ResolveStrategy::Swapped => 0.75,
            ResolveStrategy::Raw => 0.60,
            ResolveStrategy::TitleFirstRaw => 0.50,
        }
    }

    /// Build `(query, expected_title, expected_artist)` for this strategy.
    fn inputs(&self, raw_title: &str, raw_uploader: &str) -> Option<(String, String, String)> {
        match self {
            ResolveStrategy::Cleaned => {
                let artist = clean_youtube_uploader(raw_uploader);
                let title = clean_youtube_title(raw_title, Some(raw_uploader));
                if title.is_empty() {
                    return None;
                }
                let query = format!("{} {}", artist, title).trim().to_string();
                Some((query, title, artist))
            }
            ResolveStrategy::Swapped => {
                // Uploader and title inverted: the "title" is the artist.
                let artist = clean_youtube_title(raw_title, None);
                let title = clean_youtube_uploader(raw_uploader);
                if title.is_empty() || artist.is_empty() {
                    return None;
                }
                Some((format!("{} {}", artist, title), title, artist))
            }
            ResolveStrategy::Raw => Some((
                format!("{} {}", raw_uploader, raw_title).trim().to_string(),
                raw_title.to_string(),
                raw_uploader.to_string(),
            )),
            ResolveStrategy::TitleFirstRaw => Some((
                format!("{} {}", raw_title, raw_uploader).trim().to_string(),
                raw_title.to_string(),
                raw_uploader.to_string(),
            )),
        }
    }
}

/// Successful resolution with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub track: Track,
    pub confidence: f64,
    pub strategy: ResolveStrategy,
}

pub struct ExternalIdResolver {
    catalog: Arc<dyn StreamingCatalog>,
    workers: usize,
    stagger: Duration,
}

impl ExternalIdResolver {
    pub fn new(catalog: Arc<dyn StreamingCatalog>) -> Self {
        Self {
            catalog,
            workers: DEFAULT_WORKERS,
            stagger: DISPATCH_STAGGER,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    fn best_candidate(
        candidates: Vec<CatalogTrack>,
        expected_title: &str,
        expected_artist: &str,
    ) -> Option<(Track, f64)> {
        let mut best: Option<(Track, f64)> = None;
        for candidate in candidates {
            let expected = ScoreInput::new(expected_title, expected_artist);
            let input = ScoreInput::new(&candidate.track.title, candidate.track.primary_artist())
                .with_album(candidate.track.album.as_deref());
            let score = score_tracks(&expected, &input, true);

            // Album cuts outrank singles of the same song.
            let confidence =
                (score.effective_confidence() + candidate.album_preference_bonus()).clamp(0.0, 1.0);

            if best.as_ref().map(|(_, c)| confidence > *c).unwrap_or(true) {
                best = Some((candidate.track, confidence));
            }
        }
        best
    }

    /// Resolve one raw pair through the fallback chain. Each strategy
    /// waits for its predecessor; cancellation is checked before every
    /// catalog call.
    pub async fn resolve(
        &self,
        raw_title: &str,
        raw_uploader: &str,
        cancel: &CancelFlag,
    ) -> Result<Option<ResolvedTrack>> {
        for strategy in ResolveStrategy::CHAIN {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let Some((query, expected_title, expected_artist)) =
                strategy.inputs(raw_title, raw_uploader)
            else {
                continue;
            };
            if query.trim().is_empty() {
                continue;
            }

            debug!(strategy = ?strategy, query = %query, "Resolver query");
            let candidates = self
                .catalog
                .search_tracks(&query, CANDIDATES_PER_STRATEGY)
                .await?;

            if let Some((track, confidence)) =
                Self::best_candidate(candidates, &expected_title, &expected_artist)
            {
                if confidence >= strategy.threshold() {
                    info!(
                        raw_title = raw_title,
                        matched = %track.title,
                        confidence = confidence,
                        strategy = ?strategy,
                        "Resolved YouTube track"
                    );
                    return Ok(Some(ResolvedTrack {
                        track,
                        confidence,
                        strategy,
                    }));
                }
            }
        }

        debug!(raw_title = raw_title, "No catalog match for YouTube track");
        Ok(None)
    }

    /// Resolve a batch on a bounded pool, staggering dispatches.
    pub async fn resolve_batch(
        &self,
        items: Vec<(String, String)>,
        cancel: &CancelFlag,
    ) -> Vec<Option<ResolvedTrack>> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = Vec::with_capacity(items.len());

        for (position, (raw_title, raw_uploader)) in items.into_iter().enumerate() {
            if position > 0 {
                tokio::time::sleep(self.stagger).await;
            }

            let semaphore = semaphore.clone();
            let catalog = self.catalog.clone();
            let cancel = cancel.clone();
            let workers = self.workers;
            let stagger = self.stagger;

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                let resolver = ExternalIdResolver {
                    catalog,
                    workers,
                    stagger,
                };
                resolver
                    .resolve(&raw_title, &raw_uploader, &cancel)
                    .await
                    .ok()
                    .flatten()
            }));
        }

        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.ok().flatten())
            .collect()
    }
}
