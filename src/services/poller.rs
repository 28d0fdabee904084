//! Background poller over the transfer daemon's download table.
//!
//! Single-flight: one snapshot request at a time, every two seconds.
//! Correlation is id-first; rows that appear without our id are adopted by
//! case-insensitive basename match, because the daemon assigns ids
//! asynchronously. A tracked download absent from three consecutive
//! snapshots is reported missing (the grace prevents flapping on slow
//! daemon updates).

use crate::clients::TransferDaemon;
use crate::events::{CoreEvent, EventBus};
use crate::models::{TransferRow, TransferState};
use crate::services::cancel::CancelFlag;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const API_MISSING_GRACE: u32 = 3;

/// What the poller knows about one tracked download.
#[derive(Debug, Clone)]
pub struct TrackedTransfer {
    pub download_index: u64,
    pub username: String,
    pub expected_filename: String,
    pub transfer_id: Option<String>,
    pub api_missing_count: u32,
}

/// Shared registry of downloads the poller should watch. The controller
/// registers on dispatch and unregisters on terminal transitions.
#[derive(Default)]
pub struct TransferRegistry {
    entries: DashMap<u64, TrackedTransfer>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        download_index: u64,
        username: impl Into<String>,
        expected_filename: impl Into<String>,
        transfer_id: Option<String>,
    ) {
        self.entries.insert(
            download_index,
            TrackedTransfer {
                download_index,
                username: username.into(),
                expected_filename: expected_filename.into(),
                transfer_id,
                api_missing_count: 0,
            },
        );
    }

    pub fn unregister(&self, download_index: u64) {
        self.entries.remove(&download_index);
    }

    pub fn transfer_id(&self, download_index: u64) -> Option<String> {
        self.entries
            .get(&download_index)
            .and_then(|e| e.transfer_id.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Events delivered to the acquisition controller.
#[derive(Debug, Clone)]
pub enum PollerEvent {
    Update {
        download_index: u64,
        state: TransferState,
        percent: f64,
        transfer_id: Option<String>,
        username: String,
    },
    /// Absent from the daemon for the full grace window.
    Missing { download_index: u64 },
}

pub struct TransferPoller {
    daemon: Arc<dyn TransferDaemon>,
    registry: Arc<TransferRegistry>,
    events: mpsc::Sender<PollerEvent>,
    bus: EventBus,
    interval: Duration,
    in_flight: AtomicBool,
}

fn basename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl TransferPoller {
    pub fn new(
        daemon: Arc<dyn TransferDaemon>,
        registry: Arc<TransferRegistry>,
        events: mpsc::Sender<PollerEvent>,
        bus: EventBus,
    ) -> Self {
        Self {
            daemon,
            registry,
            events,
            bus,
            interval: POLL_INTERVAL,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until cancelled. Transitions happen on event consumption by
    /// the controller, never here.
    pub async fn run(self, cancel: CancelFlag) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if cancel.is_cancelled() && self.registry.is_empty() {
                break;
            }
            if self.registry.is_empty() {
                continue;
            }

            if self.in_flight.swap(true, Ordering::SeqCst) {
                continue;
            }
            let snapshot = self.daemon.downloads_snapshot().await;
            self.in_flight.store(false, Ordering::SeqCst);

            match snapshot {
                Ok(rows) => {
                    for event in self.correlate_rows(&rows) {
                        if self.events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Transient daemon hiccups are survivable; the missing
                    // counter only moves on successful snapshots.
                    warn!(error = %e, "Transfer snapshot failed");
                }
            }
        }
        debug!("Transfer poller stopped");
    }

    /// Correlate one snapshot against the registry and produce events.
    pub fn correlate_rows(&self, rows: &[TransferRow]) -> Vec<PollerEvent> {
        let by_id: HashMap<&str, &TransferRow> = rows
            .iter()
            .filter_map(|row| row.id.as_deref().map(|id| (id, row)))
            .collect();

        let mut events = Vec::new();

        for mut entry in self.registry.entries.iter_mut() {
            let matched: Option<&TransferRow> = entry
                .transfer_id
                .as_deref()
                .and_then(|id| by_id.get(id).copied())
                .or_else(|| {
                    // Adopt a row by exact case-insensitive basename match;
                    // prefer rows from the dispatched peer.
                    let expected = basename_of(&entry.expected_filename);
                    rows.iter()
                        .find(|row| {
                            row.username == entry.username
                                && basename_of(&row.filename).eq_ignore_ascii_case(expected)
                        })
                        .or_else(|| {
                            rows.iter().find(|row| {
                                basename_of(&row.filename).eq_ignore_ascii_case(expected)
                            })
                        })
                });

            match matched {
                Some(row) => {
                    entry.api_missing_count = 0;
                    if entry.transfer_id.is_none() {
                        if let Some(id) = &row.id {
                            debug!(
                                download_index = entry.download_index,
                                transfer_id = %id,
                                "Adopted transfer id from snapshot"
                            );
                            entry.transfer_id = Some(id.clone());
                        }
                    }

                    self.bus.publish(CoreEvent::TransferUpdate {
                        download_index: entry.download_index,
                        state: row.state,
                        progress: row.percent_complete,
                        transfer_id: entry.transfer_id.clone(),
                        username: Some(row.username.clone()),
                    });
                    events.push(PollerEvent::Update {
                        download_index: entry.download_index,
                        state: row.state,
                        percent: row.percent_complete,
                        transfer_id: entry.transfer_id.clone(),
                        username: row.username.clone(),
                    });
                }
                None => {
                    entry.api_missing_count += 1;
                    if entry.api_missing_count == API_MISSING_GRACE {
                        warn!(
                            download_index = entry.download_index,
                            "Transfer missing from daemon after grace period"
                        );
                        events.push(PollerEvent::Missing {
                            download_index: entry.download_index,
                        });
                    }
                }
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{SearchResponse, TransferRow};
    use async_trait::async_trait;

    struct NullDaemon;

    #[async_trait]
    impl TransferDaemon for NullDaemon {
        async fn health_check(&self) -> bool {
            true
        }
        async fn search(&self, _query: &str) -> Result<Vec<SearchResponse>> {
            Ok(vec![])
        }
        async fn enqueue_download(
            &self,
            _username: &str,
            _filename: &str,
            _size_bytes: u64,
        ) -> Result<Option<String>> {
            Ok(None)
        }
        async fn downloads_snapshot(&self) -> Result<Vec<TransferRow>> {
            Ok(vec![])
        }
        async fn cancel_download(
            &self,
            _username: &str,
            _transfer_id: &str,
            _remove: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn row(
        id: Option<&str>,
        username: &str,
        filename: &str,
        raw_state: &str,
        percent: f64,
    ) -> TransferRow {
        TransferRow {
            id: id.map(|s| s.to_string()),
            username: username.to_string(),
            filename: filename.to_string(),
            state: TransferState::classify(raw_state),
            raw_state: raw_state.to_string(),
            percent_complete: percent,
            bytes_transferred: 0,
            size_bytes: 100,
        }
    }

    fn poller() -> (TransferPoller, Arc<TransferRegistry>, mpsc::Receiver<PollerEvent>) {
        let registry = Arc::new(TransferRegistry::new());
        let (tx, rx) = mpsc::channel(64);
        let poller = TransferPoller::new(
            Arc::new(NullDaemon),
            registry.clone(),
            tx,
            EventBus::default(),
        );
        (poller, registry, rx)
    }

    #[test]
    fn id_match_produces_update() {
        let (poller, registry, _rx) = poller();
        registry.register(1, "alice", "M83/01 Midnight City.flac", Some("t-1".into()));

        let events = poller.correlate_rows(&[row(
            Some("t-1"),
            "alice",
            "M83/01 Midnight City.flac",
            "InProgress",
            42.0,
        )]);

        match &events[0] {
            PollerEvent::Update {
                download_index,
                state,
                percent,
                ..
            } => {
                assert_eq!(*download_index, 1);
                assert_eq!(*state, TransferState::InProgress);
                assert_eq!(*percent, 42.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn basename_match_adopts_id() {
        let (poller, registry, _rx) = poller();
        registry.register(7, "alice", "M83/01 Midnight City.flac", None);

        // Daemon reports a different path shape and its own id.
        let events = poller.correlate_rows(&[row(
            Some("daemon-42"),
            "alice",
            "@@alice\\music\\01 MIDNIGHT CITY.FLAC".replace('\\', "/").as_str(),
            "Queued",
            0.0,
        )]);

        assert_eq!(events.len(), 1);
        assert_eq!(registry.transfer_id(7).as_deref(), Some("daemon-42"));
    }

    #[test]
    fn three_consecutive_misses_report_missing() {
        let (poller, registry, _rx) = poller();
        registry.register(3, "alice", "M83/song.flac", Some("gone".into()));

        assert!(poller.correlate_rows(&[]).is_empty());
        assert!(poller.correlate_rows(&[]).is_empty());
        let events = poller.correlate_rows(&[]);
        assert!(matches!(
            events[0],
            PollerEvent::Missing { download_index: 3 }
        ));

        // Stays quiet afterwards; the controller owns the transition.
        assert!(poller.correlate_rows(&[]).is_empty());
    }

    #[test]
    fn reappearing_row_resets_missing_counter() {
        let (poller, registry, _rx) = poller();
        registry.register(5, "bob", "bob/song.mp3", Some("t-5".into()));

        poller.correlate_rows(&[]);
        poller.correlate_rows(&[]);
        let events = poller.correlate_rows(&[row(Some("t-5"), "bob", "bob/song.mp3", "Queued", 0.0)]);
        assert!(matches!(events[0], PollerEvent::Update { .. }));

        // Counter was reset; two more misses do not trip the grace.
        assert!(poller.correlate_rows(&[]).is_empty());
        assert!(poller.correlate_rows(&[]).is_empty());
        let events = poller.correlate_rows(&[]);
        assert!(matches!(events[0], PollerEvent::Missing { .. }));
    }

    #[test]
    fn unregistered_downloads_are_ignored() {
        let (poller, _registry, _rx) = poller();
        let events = poller.correlate_rows(&[row(Some("x"), "u", "u/file.mp3", "Queued", 0.0)]);
        assert!(events.is_empty());
    }
}
