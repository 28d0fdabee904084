//! Media-library synchronization engine.
//!
//! Reconciles externally-curated playlists against a locally-owned media
//! library and, for anything missing, drives a Soulseek transfer daemon to
//! acquire it, verifies the audio by fingerprint, and persists outcomes.

pub mod clients;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod events;
pub mod matching;
pub mod models;
pub mod recovery;
pub mod services;

pub use config::{AppConfig, ConfigStore};
pub use context::AppContext;
pub use error::{AppError, Result};
pub use events::{CoreEvent, EventBus};
