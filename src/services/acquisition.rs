//! Per-track acquisition state machines and their supervisor.
//!
//! One logical task drives every transition: searches, dispatches, poller
//! updates, and verification results all arrive as messages on a single
//! channel, so transitions for a given download are strictly linear. The
//! supervisor keeps at most `max_concurrent` tracks in flight and pulls
//! the next missing track whenever a slot frees.

use crate::clients::TransferDaemon;
use crate::error::{AppError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::matching::build_queries;
use crate::models::{
    ActiveDownload, Candidate, DownloadState, SourceContext, Track, TransferState,
    VerificationOutcome, VerificationReport, WishlistSourceType,
};
use crate::services::cancel::CancelFlag;
use crate::services::fingerprint::AudioVerifier;
use crate::services::poller::{PollerEvent, TransferPoller, TransferRegistry, POLL_INTERVAL};
use crate::services::scan::ScanCoordinator;
use crate::services::verifier::CandidateVerifier;
use crate::services::wishlist::WishlistStore;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Concurrent active downloads, tracks not workers.
    pub max_concurrent: usize,
    /// Retries per track; exceeding this is terminal failure.
    pub max_retries: u32,
    pub queued_timeout: Duration,
    pub stalled_timeout: Duration,
    pub tick_interval: Duration,
    pub poll_interval: Duration,
    pub download_root: PathBuf,
    pub quarantine_dir: PathBuf,
}

impl AcquisitionConfig {
    pub fn new(download_root: impl Into<PathBuf>) -> Self {
        let download_root: PathBuf = download_root.into();
        // Quarantine lives beside the download directory, never inside it.
        let quarantine_dir = download_root
            .parent()
            .map(|p| p.join("quarantine"))
            .unwrap_or_else(|| PathBuf::from("quarantine"));
        Self {
            max_concurrent: 3,
            max_retries: 2,
            queued_timeout: Duration::from_secs(90),
            stalled_timeout: Duration::from_secs(90),
            tick_interval: Duration::from_secs(1),
            poll_interval: POLL_INTERVAL,
            download_root,
            quarantine_dir,
        }
    }
}

/// Terminal accounting for one run. At run end
/// `completed + failed + cancelled` equals the size of the missing set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

enum ControllerMsg {
    SearchDone {
        slot: u64,
        candidates: Vec<Candidate>,
    },
    SearchFailed {
        slot: u64,
        error: String,
    },
    DispatchDone {
        slot: u64,
        transfer_id: Option<String>,
    },
    DispatchFailed {
        slot: u64,
        error: String,
    },
    VerifyDone {
        slot: u64,
        report: VerificationReport,
        file_path: PathBuf,
    },
    Poller(PollerEvent),
}

struct TrackedTrack {
    track: Track,
    queries: Vec<String>,
    query_index: usize,
    state: DownloadState,
    download: Option<ActiveDownload>,
    last_percent: f64,
}

enum RetryStep {
    Fail(String),
    Dispatch,
    NextQuery,
}

/// Find a downloaded file under the daemon's download root by basename,
/// case-insensitively, a few levels deep.
fn locate_file(root: &Path, basename: &str, depth: usize) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if path
                .file_name()
                .map(|n| n.to_string_lossy().eq_ignore_ascii_case(basename))
                .unwrap_or(false)
            {
                return Some(path);
            }
        } else if path.is_dir() {
            subdirs.push(path);
        }
    }
    if depth == 0 {
        return None;
    }
    for dir in subdirs {
        if let Some(found) = locate_file(&dir, basename, depth - 1) {
            return Some(found);
        }
    }
    None
}

pub struct AcquisitionSupervisor {
    daemon: Arc<dyn TransferDaemon>,
    verifier: CandidateVerifier,
    audio_verifier: Arc<dyn AudioVerifier>,
    wishlist: Option<Arc<WishlistStore>>,
    scan: Option<Arc<ScanCoordinator>>,
    bus: EventBus,
    config: AcquisitionConfig,
}

impl AcquisitionSupervisor {
    pub fn new(
        daemon: Arc<dyn TransferDaemon>,
        verifier: CandidateVerifier,
        audio_verifier: Arc<dyn AudioVerifier>,
        bus: EventBus,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            daemon,
            verifier,
            audio_verifier,
            wishlist: None,
            scan: None,
            bus,
            config,
        }
    }

    pub fn with_wishlist(mut self, wishlist: Arc<WishlistStore>) -> Self {
        self.wishlist = Some(wishlist);
        self
    }

    pub fn with_scan_coordinator(mut self, scan: Arc<ScanCoordinator>) -> Self {
        self.scan = Some(scan);
        self
    }

    /// Acquire every track in the missing set. Returns when each track has
    /// reached exactly one terminal state.
    pub async fn run(
        &self,
        missing: Vec<Track>,
        source: SourceContext,
        cancel: CancelFlag,
    ) -> Result<RunSummary> {
        if missing.is_empty() {
            return Ok(RunSummary::default());
        }

        if !self.daemon.health_check().await {
            self.bus.publish(CoreEvent::RunFailed {
                reason: "transfer daemon unreachable".to_string(),
            });
            return Err(AppError::DaemonUnreachable);
        }

        let registry = Arc::new(TransferRegistry::new());
        let poller_cancel = CancelFlag::new();
        let (poll_tx, mut poll_rx) = mpsc::channel(256);
        let poller = TransferPoller::new(
            self.daemon.clone(),
            registry.clone(),
            poll_tx,
            self.bus.clone(),
        )
        .with_interval(self.config.poll_interval);
        let poller_handle = tokio::spawn(poller.run(poller_cancel.clone()));

        let (msg_tx, mut msg_rx) = mpsc::channel::<ControllerMsg>(256);

        // Bridge poller events into the controller's single consumer.
        let bridge_tx = msg_tx.clone();
        let bridge = tokio::spawn(async move {
            while let Some(event) = poll_rx.recv().await {
                if bridge_tx.send(ControllerMsg::Poller(event)).await.is_err() {
                    break;
                }
            }
        });

        let mut run = RunLoop {
            daemon: self.daemon.clone(),
            verifier: self.verifier,
            audio_verifier: self.audio_verifier.clone(),
            wishlist: self.wishlist.clone(),
            scan: self.scan.clone(),
            bus: self.bus.clone(),
            config: self.config.clone(),
            registry,
            msg_tx: msg_tx.clone(),
            cancel: cancel.clone(),
            pending: VecDeque::from(missing),
            tracked: HashMap::new(),
            next_slot: 1,
            summary: RunSummary::default(),
            source,
        };

        run.fill_slots();

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut cancel_handled = false;

        while !run.is_finished() {
            tokio::select! {
                Some(msg) = msg_rx.recv() => run.handle(msg).await,
                _ = ticker.tick() => run.handle_tick().await,
            }
            if cancel.is_cancelled() && !cancel_handled {
                cancel_handled = true;
                run.cancel_all();
            }
        }

        poller_cancel.cancel();
        drop(msg_tx);
        bridge.abort();
        poller_handle.abort();
        let _ = poller_handle.await;

        info!(
            completed = run.summary.completed,
            failed = run.summary.failed,
            cancelled = run.summary.cancelled,
            "Acquisition run finished"
        );
        Ok(run.summary)
    }
}

struct RunLoop {
    daemon: Arc<dyn TransferDaemon>,
    verifier: CandidateVerifier,
    audio_verifier: Arc<dyn AudioVerifier>,
    wishlist: Option<Arc<WishlistStore>>,
    scan: Option<Arc<ScanCoordinator>>,
    bus: EventBus,
    config: AcquisitionConfig,
    registry: Arc<TransferRegistry>,
    msg_tx: mpsc::Sender<ControllerMsg>,
    cancel: CancelFlag,
    pending: VecDeque<Track>,
    tracked: HashMap<u64, TrackedTrack>,
    next_slot: u64,
    summary: RunSummary,
    source: SourceContext,
}

impl RunLoop {
    fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.tracked.values().all(|t| t.state.is_terminal())
    }

    fn active_count(&self) -> usize {
        self.tracked
            .values()
            .filter(|t| !t.state.is_terminal())
            .count()
    }

    fn fill_slots(&mut self) {
        while self.active_count() < self.config.max_concurrent {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(track) = self.pending.pop_front() else {
                break;
            };
            self.start_track(track);
        }
    }

    fn start_track(&mut self, track: Track) {
        let slot = self.next_slot;
        self.next_slot += 1;

        let queries = build_queries(&track.title, track.primary_artist(), track.album.as_deref());
        debug!(slot = slot, track = %track.title, queries = queries.len(), "Starting track");

        self.tracked.insert(
            slot,
            TrackedTrack {
                track,
                queries,
                query_index: 0,
                state: DownloadState::Searching { query_index: 0 },
                download: None,
                last_percent: 0.0,
            },
        );
        self.spawn_search(slot);
    }

    fn spawn_search(&mut self, slot: u64) {
        let (query, title, artist) = {
            let Some(tracked) = self.tracked.get_mut(&slot) else {
                return;
            };
            let Some(query) = tracked.queries.get(tracked.query_index).cloned() else {
                return;
            };
            tracked.state = DownloadState::Searching {
                query_index: tracked.query_index,
            };
            (
                query,
                tracked.track.title.clone(),
                tracked.track.primary_artist().to_string(),
            )
        };

        let daemon = self.daemon.clone();
        let verifier = self.verifier;
        let tx = self.msg_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            if cancel.is_cancelled() {
                let _ = tx
                    .send(ControllerMsg::SearchFailed {
                        slot,
                        error: "cancelled".to_string(),
                    })
                    .await;
                return;
            }
            match daemon.search(&query).await {
                Ok(responses) => {
                    let candidates = verifier.verify(&responses, &title, &artist);
                    let _ = tx.send(ControllerMsg::SearchDone { slot, candidates }).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(ControllerMsg::SearchFailed {
                            slot,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    fn spawn_dispatch(&mut self, slot: u64) {
        let candidate = {
            let Some(tracked) = self.tracked.get_mut(&slot) else {
                return;
            };
            if tracked.download.is_none() {
                return;
            }
            tracked.state = DownloadState::Dispatching;
            let Some(download) = &tracked.download else {
                return;
            };
            download.candidate.clone()
        };

        let daemon = self.daemon.clone();
        let tx = self.msg_tx.clone();

        tokio::spawn(async move {
            match daemon
                .enqueue_download(&candidate.username, &candidate.filename, candidate.size_bytes)
                .await
            {
                Ok(transfer_id) => {
                    let _ = tx
                        .send(ControllerMsg::DispatchDone { slot, transfer_id })
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(ControllerMsg::DispatchFailed {
                            slot,
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });
    }

    async fn handle(&mut self, msg: ControllerMsg) {
        match msg {
            ControllerMsg::SearchDone { slot, candidates } => {
                self.on_search_done(slot, candidates).await
            }
            ControllerMsg::SearchFailed { slot, error } => {
                self.on_search_failed(slot, error).await
            }
            ControllerMsg::DispatchDone { slot, transfer_id } => {
                self.on_dispatch_done(slot, transfer_id)
            }
            ControllerMsg::DispatchFailed { slot, error } => {
                self.on_retry(slot, format!("dispatch failed: {}", error)).await
            }
            ControllerMsg::VerifyDone {
                slot,
                report,
                file_path,
            } => self.on_verified(slot, report, file_path).await,
            ControllerMsg::Poller(PollerEvent::Update {
                download_index,
                state,
                percent,
                transfer_id,
                ..
            }) => {
                self.on_transfer_update(download_index, state, percent, transfer_id)
                    .await
            }
            ControllerMsg::Poller(PollerEvent::Missing { download_index }) => {
                self.on_retry(
                    download_index,
                    "transfer disappeared from daemon".to_string(),
                )
                .await
            }
        }
    }

    fn is_live(&self, slot: u64) -> bool {
        self.tracked
            .get(&slot)
            .map(|t| !t.state.is_terminal())
            .unwrap_or(false)
    }

    async fn on_search_done(&mut self, slot: u64, candidates: Vec<Candidate>) {
        if !self.is_live(slot) {
            return;
        }
        if candidates.is_empty() {
            debug!(slot = slot, "Query produced no candidates");
            self.advance_query(slot).await;
            return;
        }

        let dispatched = {
            let Some(tracked) = self.tracked.get_mut(&slot) else {
                return;
            };
            let used = tracked
                .download
                .as_ref()
                .map(|d| d.used_sources.clone())
                .unwrap_or_default();
            match candidates
                .iter()
                .find(|c| !used.contains(&c.source_key()))
                .cloned()
            {
                Some(head) => {
                    let mut download = match tracked.download.take() {
                        None => ActiveDownload::new(slot, tracked.track.clone(), head),
                        Some(mut download) => {
                            download.adopt_candidate(head);
                            download
                        }
                    };
                    download.candidates_cache = candidates;
                    tracked.download = Some(download);
                    true
                }
                None => false,
            }
        };

        if dispatched {
            self.spawn_dispatch(slot);
        } else {
            self.advance_query(slot).await;
        }
    }

    async fn on_search_failed(&mut self, slot: u64, error: String) {
        if self.cancel.is_cancelled() || !self.is_live(slot) {
            return;
        }
        warn!(slot = slot, error = %error, "Search failed, advancing to next query");
        self.advance_query(slot).await;
    }

    fn on_dispatch_done(&mut self, slot: u64, transfer_id: Option<String>) {
        let dispatched = {
            let Some(tracked) = self
                .tracked
                .get_mut(&slot)
                .filter(|t| !t.state.is_terminal())
            else {
                return;
            };
            let Some(download) = &mut tracked.download else {
                return;
            };
            download.transfer_id = transfer_id.clone();
            download.queued_start_time = Some(Instant::now());
            tracked.state = DownloadState::Queued;
            tracked.last_percent = 0.0;
            (
                tracked.track.id.clone(),
                tracked.track.title.clone(),
                download.candidate.username.clone(),
                download.candidate.filename.clone(),
            )
        };

        let (track_id, title, username, filename) = dispatched;
        self.registry
            .register(slot, username.clone(), filename.clone(), transfer_id);
        self.bus.publish(CoreEvent::Dispatched {
            download_index: slot,
            track_id,
            username: username.clone(),
            filename,
        });
        info!(slot = slot, track = %title, username = %username, "Dispatched download");
    }

    async fn on_transfer_update(
        &mut self,
        slot: u64,
        state: TransferState,
        percent: f64,
        transfer_id: Option<String>,
    ) {
        {
            let Some(tracked) = self
                .tracked
                .get_mut(&slot)
                .filter(|t| !t.state.is_terminal())
            else {
                return;
            };
            if matches!(tracked.state, DownloadState::Verifying) {
                return;
            }
            if let Some(download) = &mut tracked.download {
                if download.transfer_id.is_none() {
                    download.transfer_id = transfer_id;
                }
            }
            match state {
                TransferState::Queued => return,
                TransferState::InProgress => {
                    if tracked.state != DownloadState::Downloading {
                        tracked.state = DownloadState::Downloading;
                        if let Some(download) = &mut tracked.download {
                            download.downloading_start_time.get_or_insert(Instant::now());
                        }
                    }
                    tracked.last_percent = percent;
                    return;
                }
                _ => {}
            }
        }

        match state {
            TransferState::Completed => self.on_transfer_completed(slot),
            TransferState::Failed => self.on_retry(slot, "transfer failed".to_string()).await,
            TransferState::Cancelled => {
                self.on_retry(slot, "transfer cancelled by daemon".to_string())
                    .await
            }
            _ => {}
        }
    }

    fn on_transfer_completed(&mut self, slot: u64) {
        let (basename, title, artist) = {
            let Some(tracked) = self
                .tracked
                .get_mut(&slot)
                .filter(|t| !t.state.is_terminal())
            else {
                return;
            };
            if tracked.download.is_none() {
                return;
            }
            tracked.state = DownloadState::Verifying;
            let Some(download) = &tracked.download else {
                return;
            };
            (
                download.candidate.basename().to_string(),
                tracked.track.title.clone(),
                tracked.track.primary_artist().to_string(),
            )
        };

        self.registry.unregister(slot);

        let expected = self.config.download_root.join(&basename);
        let root = self.config.download_root.clone();
        let audio_verifier = self.audio_verifier.clone();
        let tx = self.msg_tx.clone();

        tokio::spawn(async move {
            let root_clone = root.clone();
            let basename_clone = basename.clone();
            let located =
                tokio::task::spawn_blocking(move || locate_file(&root_clone, &basename_clone, 4))
                    .await
                    .ok()
                    .flatten();

            let (report, file_path) = match located {
                Some(path) => {
                    let report = audio_verifier.verify_file(&path, &title, &artist).await;
                    (report, path)
                }
                None => (
                    VerificationReport::skip("completed file not found on disk"),
                    expected,
                ),
            };

            let _ = tx
                .send(ControllerMsg::VerifyDone {
                    slot,
                    report,
                    file_path,
                })
                .await;
        });
    }

    async fn on_verified(&mut self, slot: u64, report: VerificationReport, file_path: PathBuf) {
        let verifying = self
            .tracked
            .get(&slot)
            .map(|t| matches!(t.state, DownloadState::Verifying))
            .unwrap_or(false);
        if !verifying {
            return;
        }

        self.bus.publish(CoreEvent::Verified {
            download_index: slot,
            outcome: report.outcome,
            reason: report.reason.clone(),
        });

        match report.outcome {
            VerificationOutcome::Fail => {
                self.quarantine(&file_path);
                self.on_retry(slot, format!("verification failed: {}", report.reason))
                    .await;
            }
            _ => self.complete(slot, file_path),
        }
    }

    fn quarantine(&self, file_path: &Path) {
        let Some(basename) = file_path.file_name() else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(&self.config.quarantine_dir) {
            warn!(error = %e, "Could not create quarantine directory");
            return;
        }
        let dest = self.config.quarantine_dir.join(basename);
        match std::fs::rename(file_path, &dest) {
            Ok(()) => info!(file = %dest.display(), "Quarantined failed download"),
            Err(e) => warn!(
                error = %e,
                file = %file_path.display(),
                "Could not quarantine file"
            ),
        }
    }

    fn complete(&mut self, slot: u64, file_path: PathBuf) {
        let (track_id, title) = {
            let Some(tracked) = self
                .tracked
                .get_mut(&slot)
                .filter(|t| !t.state.is_terminal())
            else {
                return;
            };
            tracked.state = DownloadState::Completed;
            (tracked.track.id.clone(), tracked.track.title.clone())
        };

        self.summary.completed += 1;
        self.registry.unregister(slot);
        self.bus.publish(CoreEvent::Completed {
            download_index: slot,
            track_id,
            file_path: file_path.to_string_lossy().to_string(),
        });
        info!(slot = slot, track = %title, "Track acquired");

        if let Some(scan) = &self.scan {
            scan.request_scan("download completed");
        }
        self.fill_slots();
    }

    /// Retry machinery: cancel the stuck transfer first, then try the next
    /// cached candidate, then the next query, then give up.
    async fn on_retry(&mut self, slot: u64, reason: String) {
        if !self.is_live(slot) {
            return;
        }
        debug!(slot = slot, reason = %reason, "Entering retry");

        // Cancel-before-retry: without this the daemon keeps running the
        // old transfer alongside the new one and mislabels completions.
        let cancel_target = {
            let Some(tracked) = self.tracked.get_mut(&slot) else {
                return;
            };
            tracked.last_percent = 0.0;
            tracked.download.as_ref().and_then(|d| {
                d.transfer_id
                    .as_ref()
                    .map(|id| (d.candidate.username.clone(), id.clone()))
            })
        };
        if let Some((username, transfer_id)) = cancel_target {
            let daemon = self.daemon.clone();
            tokio::spawn(async move {
                if let Err(e) = daemon.cancel_download(&username, &transfer_id, false).await {
                    warn!(error = %e, transfer_id = %transfer_id, "Cancel before retry failed");
                }
            });
        }
        self.registry.unregister(slot);

        let max_retries = self.config.max_retries;
        let step = {
            let Some(tracked) = self.tracked.get_mut(&slot) else {
                return;
            };
            match tracked.download.as_mut() {
                None => RetryStep::Fail(reason.clone()),
                Some(download) => {
                    download.retry_count += 1;
                    if download.retry_count > max_retries {
                        RetryStep::Fail(format!("retries exhausted: {}", reason))
                    } else {
                        match download.next_unused_candidate() {
                            Some(candidate) => {
                                download.adopt_candidate(candidate);
                                RetryStep::Dispatch
                            }
                            None => RetryStep::NextQuery,
                        }
                    }
                }
            }
        };

        if matches!(step, RetryStep::Dispatch | RetryStep::NextQuery) {
            if let Some(tracked) = self.tracked.get_mut(&slot) {
                tracked.state = DownloadState::Retrying;
            }
        }

        match step {
            RetryStep::Fail(reason) => self.fail(slot, reason).await,
            RetryStep::Dispatch => self.spawn_dispatch(slot),
            RetryStep::NextQuery => self.advance_query(slot).await,
        }
    }

    async fn advance_query(&mut self, slot: u64) {
        let has_next = {
            let Some(tracked) = self
                .tracked
                .get_mut(&slot)
                .filter(|t| !t.state.is_terminal())
            else {
                return;
            };
            tracked.query_index += 1;
            tracked.query_index < tracked.queries.len()
        };

        if has_next {
            self.spawn_search(slot);
        } else {
            self.fail(slot, "no candidates across all queries".to_string())
                .await;
        }
    }

    async fn fail(&mut self, slot: u64, reason: String) {
        let track = {
            let Some(tracked) = self
                .tracked
                .get_mut(&slot)
                .filter(|t| !t.state.is_terminal())
            else {
                return;
            };
            tracked.state = DownloadState::Failed;
            tracked.track.clone()
        };

        self.summary.failed += 1;
        self.registry.unregister(slot);
        warn!(slot = slot, track = %track.title, reason = %reason, "Track failed");
        self.bus.publish(CoreEvent::Failed {
            download_index: slot,
            track_id: track.id.clone(),
            reason,
        });

        // Every terminal failure is offered to the wishlist exactly once;
        // the terminal-state guard above makes re-entry impossible.
        if let Some(wishlist) = &self.wishlist {
            if let Err(e) = wishlist
                .add(&track, WishlistSourceType::Playlist, &self.source)
                .await
            {
                warn!(error = %e, track = %track.title, "Could not wishlist failed track");
            }
        }
        self.fill_slots();
    }

    async fn handle_tick(&mut self) {
        let now = Instant::now();
        let mut timed_out: Vec<(u64, String)> = Vec::new();

        for (slot, tracked) in &self.tracked {
            let Some(download) = &tracked.download else {
                continue;
            };
            match tracked.state {
                DownloadState::Queued => {
                    if let Some(start) = download.queued_start_time {
                        if now.duration_since(start) >= self.config.queued_timeout {
                            timed_out.push((*slot, "stuck in queue".to_string()));
                        }
                    }
                }
                DownloadState::Downloading if tracked.last_percent <= 0.0 => {
                    if let Some(start) = download.downloading_start_time {
                        if now.duration_since(start) >= self.config.stalled_timeout {
                            timed_out.push((*slot, "stalled at 0%".to_string()));
                        }
                    }
                }
                _ => {}
            }
        }

        for (slot, reason) in timed_out {
            self.on_retry(slot, reason).await;
        }
        self.fill_slots();
    }

    fn cancel_all(&mut self) {
        info!("Cancelling acquisition run");
        let slots: Vec<u64> = self
            .tracked
            .iter()
            .filter(|(_, t)| !t.state.is_terminal())
            .map(|(slot, _)| *slot)
            .collect();

        for slot in slots {
            let (track_id, cancel_target) = {
                let Some(tracked) = self.tracked.get_mut(&slot) else {
                    continue;
                };
                tracked.state = DownloadState::Cancelled;
                let cancel_target = tracked.download.as_ref().and_then(|d| {
                    d.transfer_id
                        .as_ref()
                        .map(|id| (d.candidate.username.clone(), id.clone()))
                });
                (tracked.track.id.clone(), cancel_target)
            };

            if let Some((username, transfer_id)) = cancel_target {
                let daemon = self.daemon.clone();
                tokio::spawn(async move {
                    let _ = daemon.cancel_download(&username, &transfer_id, false).await;
                });
            }
            self.summary.cancelled += 1;
            self.registry.unregister(slot);
            self.bus.publish(CoreEvent::Cancelled {
                download_index: slot,
                track_id,
            });
        }

        while let Some(track) = self.pending.pop_front() {
            let slot = self.next_slot;
            self.next_slot += 1;
            self.summary.cancelled += 1;
            self.bus.publish(CoreEvent::Cancelled {
                download_index: slot,
                track_id: track.id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchResponse, SharedFile, TransferRow};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted daemon: search results by query substring, transfer rows
    /// derived from what has been enqueued.
    struct ScriptedDaemon {
        search_results: Mutex<Vec<(String, Vec<SearchResponse>)>>,
        /// filename -> sequence of (raw_state, percent); the last entry
        /// repeats forever.
        transfer_script: Mutex<HashMap<String, Vec<(String, f64)>>>,
        enqueued: Mutex<Vec<(String, String)>>,
        cancels: Mutex<Vec<(String, String, bool)>>,
        poll_counts: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedDaemon {
        fn new() -> Self {
            Self {
                search_results: Mutex::new(Vec::new()),
                transfer_script: Mutex::new(HashMap::new()),
                enqueued: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
                poll_counts: Mutex::new(HashMap::new()),
            }
        }

        fn on_search(&self, query_substring: &str, responses: Vec<SearchResponse>) {
            self.search_results
                .lock()
                .unwrap()
                .push((query_substring.to_string(), responses));
        }

        fn script_transfer(&self, filename: &str, states: Vec<(&str, f64)>) {
            self.transfer_script.lock().unwrap().insert(
                filename.to_string(),
                states
                    .into_iter()
                    .map(|(s, p)| (s.to_string(), p))
                    .collect(),
            );
        }
    }

    #[async_trait]
    impl TransferDaemon for ScriptedDaemon {
        async fn health_check(&self) -> bool {
            true
        }

        async fn search(&self, query: &str) -> crate::error::Result<Vec<SearchResponse>> {
            let results = self.search_results.lock().unwrap();
            Ok(results
                .iter()
                .find(|(needle, _)| query.contains(needle.as_str()))
                .map(|(_, responses)| responses.clone())
                .unwrap_or_default())
        }

        async fn enqueue_download(
            &self,
            username: &str,
            filename: &str,
            _size_bytes: u64,
        ) -> crate::error::Result<Option<String>> {
            self.enqueued
                .lock()
                .unwrap()
                .push((username.to_string(), filename.to_string()));
            Ok(Some(format!("t-{}", username)))
        }

        async fn downloads_snapshot(&self) -> crate::error::Result<Vec<TransferRow>> {
            let enqueued = self.enqueued.lock().unwrap().clone();
            let script = self.transfer_script.lock().unwrap();
            let mut counts = self.poll_counts.lock().unwrap();

            let mut rows = Vec::new();
            for (username, filename) in enqueued {
                let Some(states) = script.get(&filename) else {
                    continue;
                };
                let count = counts.entry(filename.clone()).or_insert(0);
                let (raw_state, percent) = states
                    .get(*count)
                    .cloned()
                    .unwrap_or_else(|| states.last().cloned().unwrap());
                *count += 1;

                rows.push(TransferRow {
                    id: Some(format!("t-{}", username)),
                    username,
                    filename: filename.clone(),
                    state: TransferState::classify(&raw_state),
                    raw_state,
                    percent_complete: percent,
                    bytes_transferred: 0,
                    size_bytes: 100,
                });
            }
            Ok(rows)
        }

        async fn cancel_download(
            &self,
            username: &str,
            transfer_id: &str,
            remove: bool,
        ) -> crate::error::Result<()> {
            self.cancels.lock().unwrap().push((
                username.to_string(),
                transfer_id.to_string(),
                remove,
            ));
            Ok(())
        }
    }

    struct StubAudioVerifier(VerificationReport);

    #[async_trait]
    impl AudioVerifier for StubAudioVerifier {
        async fn verify_file(
            &self,
            _audio_file: &Path,
            _title: &str,
            _artist: &str,
        ) -> VerificationReport {
            self.0.clone()
        }
    }

    fn response(username: &str, filename: &str) -> SearchResponse {
        SearchResponse {
            username: username.to_string(),
            files: vec![SharedFile {
                filename: filename.to_string(),
                size_bytes: 1000,
                bitrate_kbps: None,
            }],
        }
    }

    fn fast_config(dir: &tempfile::TempDir) -> AcquisitionConfig {
        let mut config = AcquisitionConfig::new(dir.path().join("downloads"));
        config.queued_timeout = Duration::from_millis(250);
        config.stalled_timeout = Duration::from_millis(250);
        config.tick_interval = Duration::from_millis(50);
        config.poll_interval = Duration::from_millis(50);
        config
    }

    fn supervisor(
        daemon: Arc<ScriptedDaemon>,
        config: AcquisitionConfig,
        report: VerificationReport,
    ) -> (AcquisitionSupervisor, EventBus) {
        let bus = EventBus::new(1024);
        let supervisor = AcquisitionSupervisor::new(
            daemon,
            CandidateVerifier::new(crate::services::verifier::QualityPreference::Any),
            Arc::new(StubAudioVerifier(report)),
            bus.clone(),
            config,
        );
        (supervisor, bus)
    }

    fn m83_track() -> Track {
        Track::new("t1", "Midnight City", vec!["M83".to_string()])
            .with_album("Hurry Up, We're Dreaming")
            .with_duration_ms(244_000)
    }

    #[tokio::test]
    async fn empty_missing_set_completes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Arc::new(ScriptedDaemon::new());
        let (supervisor, _bus) = supervisor(
            daemon,
            fast_config(&dir),
            VerificationReport::skip("unused"),
        );

        let summary = supervisor
            .run(vec![], SourceContext::playlist("p", "p1"), CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn happy_path_single_track() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(&dir);

        // Put the completed file where the locator will find it.
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("01 Midnight City.flac"), b"flac").unwrap();

        let daemon = Arc::new(ScriptedDaemon::new());
        daemon.on_search(
            "M83 Midnight City",
            vec![response("alice", "M83/Hurry Up/01 Midnight City.flac")],
        );
        daemon.script_transfer(
            "M83/Hurry Up/01 Midnight City.flac",
            vec![
                ("Queued", 0.0),
                ("InProgress", 50.0),
                ("Completed, Succeeded", 100.0),
            ],
        );

        let (supervisor, bus) = supervisor(
            daemon.clone(),
            config,
            VerificationReport::pass("audio verified"),
        );
        let mut rx = bus.subscribe();

        let summary = supervisor
            .run(
                vec![m83_track()],
                SourceContext::playlist("p", "p1"),
                CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total(), 1);
        assert_eq!(daemon.enqueued.lock().unwrap().len(), 1);

        // Terminal event stream contains exactly one Completed for slot 1.
        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            if let CoreEvent::Completed { download_index, .. } = event {
                assert_eq!(download_index, 1);
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn stuck_queue_cancels_then_tries_next_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(&dir);
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("01 Midnight City.flac"), b"x").unwrap();

        let daemon = Arc::new(ScriptedDaemon::new());
        daemon.on_search(
            "M83 Midnight City",
            vec![
                response("alice", "M83/a/01 Midnight City.flac"),
                response("bob", "M83/b/01 Midnight City.flac"),
            ],
        );
        // Alice never leaves the queue; bob completes.
        daemon.script_transfer("M83/a/01 Midnight City.flac", vec![("Queued", 0.0)]);
        daemon.script_transfer(
            "M83/b/01 Midnight City.flac",
            vec![("Completed, Succeeded", 100.0)],
        );

        let (supervisor, _bus) = supervisor(
            daemon.clone(),
            config,
            VerificationReport::skip("verifier offline"),
        );

        let summary = supervisor
            .run(
                vec![m83_track()],
                SourceContext::playlist("p", "p1"),
                CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.completed, 1);

        // Cancel-before-retry hit the stuck transfer with remove=false.
        let cancels = daemon.cancels.lock().unwrap();
        assert!(cancels
            .iter()
            .any(|(user, id, remove)| user == "alice" && id == "t-alice" && !remove));

        // Both candidates were dispatched, the stuck one first.
        let enqueued = daemon.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 2);
        assert_eq!(enqueued[0].0, "alice");
        assert_eq!(enqueued[1].0, "bob");
    }

    #[tokio::test]
    async fn failed_verification_quarantines_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast_config(&dir);
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("01 Midnight City.flac"), b"wrong-song").unwrap();

        let daemon = Arc::new(ScriptedDaemon::new());
        // Single candidate; after the verification failure the retry finds
        // no alternates and the remaining queries yield nothing.
        daemon.on_search(
            "M83 Midnight City",
            vec![response("alice", "M83/a/01 Midnight City.flac")],
        );
        daemon.script_transfer(
            "M83/a/01 Midnight City.flac",
            vec![("Completed, Succeeded", 100.0)],
        );

        let (supervisor, _bus) = supervisor(
            daemon.clone(),
            config.clone(),
            VerificationReport::fail("audio mismatch: file identified as 'Different Song'"),
        );

        let summary = supervisor
            .run(
                vec![m83_track()],
                SourceContext::playlist("p", "p1"),
                CancelFlag::new(),
            )
            .await
            .unwrap();

        // Quarantined, retried, and ultimately failed.
        assert!(config.quarantine_dir.join("01 Midnight City.flac").exists());
        assert!(!downloads.join("01 Midnight City.flac").exists());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 0);
    }

    #[tokio::test]
    async fn exhausted_queries_fail_and_wishlist() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Arc::new(ScriptedDaemon::new());
        // No search results at all.

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let wishlist = Arc::new(WishlistStore::new(pool).await.unwrap());

        let bus = EventBus::new(256);
        let supervisor = AcquisitionSupervisor::new(
            daemon,
            CandidateVerifier::new(crate::services::verifier::QualityPreference::Any),
            Arc::new(StubAudioVerifier(VerificationReport::skip("unused"))),
            bus.clone(),
            fast_config(&dir),
        )
        .with_wishlist(wishlist.clone());

        let summary = supervisor
            .run(
                vec![m83_track()],
                SourceContext::playlist("My Playlist", "p1"),
                CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        let entries = wishlist.list(None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].track.title, "Midnight City");
        assert_eq!(entries[0].source_context.name, "My Playlist");
    }

    #[tokio::test]
    async fn cancellation_accounts_for_every_track() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Arc::new(ScriptedDaemon::new());
        // Searches return nothing, so tracks cycle through queries until
        // the cancel lands.
        let (supervisor, _bus) = supervisor(
            daemon,
            fast_config(&dir),
            VerificationReport::skip("unused"),
        );

        let cancel = CancelFlag::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel_clone.cancel();
        });

        let tracks: Vec<Track> = (0..5)
            .map(|i| {
                Track::new(
                    format!("t{}", i),
                    format!("Song {}", i),
                    vec!["A".to_string()],
                )
            })
            .collect();

        let summary = supervisor
            .run(tracks, SourceContext::playlist("p", "p1"), cancel)
            .await
            .unwrap();

        assert_eq!(summary.total(), 5);
        assert_eq!(summary.completed, 0);
        assert!(summary.cancelled + summary.failed == 5);
    }
}
