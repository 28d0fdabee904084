//! Uniform capability surface over the supported media servers.
//!
//! Plex, Jellyfin, and Navidrome differ in auth, track listing, and scan
//! probing; the engine sees one interface and records provenance through
//! the `server_source` tag on every [`LibraryTrack`].

use crate::error::Result;
use crate::models::{LibraryTrack, ServerSource};
use async_trait::async_trait;

#[async_trait]
pub trait MediaServer: Send + Sync {
    fn source(&self) -> ServerSource;

    /// Cheap connectivity probe; used before committing to a bulk load.
    async fn is_connected(&self) -> bool;

    /// Bulk-load every music track the server knows about. Called once per
    /// run to build the library index.
    async fn list_tracks(&self) -> Result<Vec<LibraryTrack>>;

    /// Ask the server to rescan its music library.
    async fn trigger_scan(&self) -> Result<()>;

    /// Whether a library scan is currently running.
    async fn is_scanning(&self) -> Result<bool>;

    /// Create the named playlist with the given track ids, replacing an
    /// existing playlist of the same name. When `backup_name` is given the
    /// previous playlist is preserved under that name instead of dropped.
    async fn create_or_update_playlist(
        &self,
        name: &str,
        track_ids: &[String],
        backup_name: Option<&str>,
    ) -> Result<()>;
}
