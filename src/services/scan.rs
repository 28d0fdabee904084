//! Debounced, single-flight media-library scan coordination.
//!
//! Library scans can run for tens of minutes. Requests are debounced,
//! downloads completing during an active scan flag a follow-up, and a
//! periodic mid-scan probe invokes completion callbacks so incremental
//! refreshes keep the rest of the app current while the server churns.

use crate::clients::MediaServer;
use crate::services::cancel::CancelFlag;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    pub debounce: Duration,
    pub probe_interval: Duration,
    pub max_scan_time: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(60),
            probe_interval: Duration::from_secs(300),
            max_scan_time: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Default)]
struct ScanState {
    scan_in_progress: bool,
    downloads_during_scan: bool,
    /// Bumping invalidates any pending debounce timer.
    debounce_generation: u64,
    timer_active: bool,
}

/// Snapshot of the coordinator for status displays.
#[derive(Debug, Clone)]
pub struct ScanStatus {
    pub scan_in_progress: bool,
    pub downloads_during_scan: bool,
    pub timer_active: bool,
}

type Callback = Box<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct ScanCoordinator {
    server: Arc<dyn MediaServer>,
    state: Arc<Mutex<ScanState>>,
    callbacks: Arc<Mutex<Vec<Callback>>>,
    config: ScanConfig,
    cancel: CancelFlag,
}

impl ScanCoordinator {
    pub fn new(server: Arc<dyn MediaServer>) -> Self {
        Self::with_config(server, ScanConfig::default())
    }

    pub fn with_config(server: Arc<dyn MediaServer>, config: ScanConfig) -> Self {
        Self {
            server,
            state: Arc::new(Mutex::new(ScanState::default())),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Register a callback invoked on every mid-scan probe and once on
    /// scan completion. Typically an incremental library-DB refresh.
    pub fn add_completion_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// Request a scan with debouncing. During an active scan the request
    /// is folded into a follow-up instead.
    pub fn request_scan(&self, reason: &str) {
        let generation = {
            let mut state = self.state.lock().unwrap();
            if state.scan_in_progress {
                state.downloads_during_scan = true;
                info!(reason = reason, "Scan in progress, queueing follow-up scan");
                return;
            }
            state.debounce_generation += 1;
            state.timer_active = true;
            if state.debounce_generation > 1 {
                debug!(reason = reason, "Resetting scan debounce timer");
            } else {
                info!(
                    reason = reason,
                    delay_s = self.config.debounce.as_secs(),
                    "Scan queued"
                );
            }
            state.debounce_generation
        };

        let this = self.clone();
        tokio::spawn(async move {
            sleep(this.config.debounce).await;
            {
                let mut state = this.state.lock().unwrap();
                if state.debounce_generation != generation || state.scan_in_progress {
                    return;
                }
                state.timer_active = false;
            }
            this.execute().await;
        });
    }

    /// Bypass the debounce. No-op when a scan is already running.
    pub fn force_scan(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.scan_in_progress {
                warn!("Force scan requested but scan already in progress");
                return;
            }
            state.debounce_generation += 1;
            state.timer_active = false;
        }
        let this = self.clone();
        tokio::spawn(async move { this.execute().await });
    }

    async fn execute(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.scan_in_progress {
                return;
            }
            state.scan_in_progress = true;
            state.downloads_during_scan = false;
        }

        info!(server = %self.server.source(), "Starting media library scan");
        if let Err(e) = self.server.trigger_scan().await {
            warn!(error = %e, "Failed to initiate library scan");
            self.reset_after_error();
            return;
        }

        let started = Instant::now();
        loop {
            sleep(self.config.probe_interval).await;
            if self.cancel.is_cancelled() {
                break;
            }
            if started.elapsed() > self.config.max_scan_time {
                warn!(
                    elapsed_s = started.elapsed().as_secs(),
                    "Scan timeout reached, assuming completion"
                );
                break;
            }

            match self.server.is_scanning().await {
                Ok(true) => {
                    debug!("Server still scanning, running incremental update");
                    self.run_callbacks();
                }
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "Scan status probe failed");
                    break;
                }
            }
        }

        info!("Media library scan completed");
        self.run_callbacks();

        let follow_up = {
            let mut state = self.state.lock().unwrap();
            state.scan_in_progress = false;
            std::mem::take(&mut state.downloads_during_scan)
        };
        if follow_up && !self.cancel.is_cancelled() {
            info!("Downloads occurred during scan, triggering follow-up scan");
            self.request_scan("follow-up");
        }
    }

    fn run_callbacks(&self) {
        let callbacks = self.callbacks.lock().unwrap();
        for callback in callbacks.iter() {
            callback();
        }
    }

    fn reset_after_error(&self) {
        let mut state = self.state.lock().unwrap();
        state.scan_in_progress = false;
    }

    pub fn status(&self) -> ScanStatus {
        let state = self.state.lock().unwrap();
        ScanStatus {
            scan_in_progress: state.scan_in_progress,
            downloads_during_scan: state.downloads_during_scan,
            timer_active: state.timer_active,
        }
    }

    /// Cancel pending timers and stop probing.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock().unwrap();
        state.debounce_generation += 1;
        state.timer_active = false;
    }
}
