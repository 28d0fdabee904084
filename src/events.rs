//! Typed core events and their fan-out bus.
//!
//! The core emits events onto a broadcast channel; observers subscribe
//! without being referenced by the core. Lagging receivers may lose
//! progress updates; terminal transitions are additionally recorded on the
//! run summary so no observer can miss an outcome by rejoining late.

use crate::models::{TransferState, VerificationOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Result of one library lookup during analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackAnalyzedPayload {
    pub index: usize,
    pub track_id: String,
    pub found: bool,
    pub confidence: f64,
}

/// Events emitted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    AnalysisStarted {
        playlist_id: String,
        total: usize,
    },
    TrackAnalyzed {
        playlist_id: String,
        payload: TrackAnalyzedPayload,
    },
    AnalysisCompleted {
        playlist_id: String,
        missing: usize,
    },
    Dispatched {
        download_index: u64,
        track_id: String,
        username: String,
        filename: String,
    },
    TransferUpdate {
        download_index: u64,
        state: TransferState,
        progress: f64,
        transfer_id: Option<String>,
        username: Option<String>,
    },
    Verified {
        download_index: u64,
        outcome: VerificationOutcome,
        reason: String,
    },
    Completed {
        download_index: u64,
        track_id: String,
        file_path: String,
    },
    Failed {
        download_index: u64,
        track_id: String,
        reason: String,
    },
    Cancelled {
        download_index: u64,
        track_id: String,
    },
    RunFailed {
        reason: String,
    },
}

impl CoreEvent {
    /// Terminal events must never be dropped by the pipeline itself;
    /// progress events are latest-wins.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreEvent::Completed { .. }
                | CoreEvent::Failed { .. }
                | CoreEvent::Cancelled { .. }
                | CoreEvent::RunFailed { .. }
        )
    }
}

/// Bounded broadcast fan-out for core events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A bus with no subscribers is fine; the send result
    /// only reports receiver absence.
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
