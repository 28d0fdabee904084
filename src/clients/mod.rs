pub mod acoustid;
pub mod catalog;
pub mod jellyfin;
pub mod media_server;
pub mod navidrome;
pub mod plex;
pub mod transfer;
pub mod youtube;

pub use acoustid::{AcoustIdClient, FingerprintData, LookupOutcome, RecordingMatch};
pub use catalog::{
    AccessTokenSource, AlbumKind, CatalogTrack, SpotifyCatalog, StaticToken, StreamingCatalog,
};
pub use jellyfin::JellyfinClient;
pub use media_server::MediaServer;
pub use navidrome::NavidromeClient;
pub use plex::PlexClient;
pub use transfer::{SlskdClient, TransferDaemon};
pub use youtube::{parse_dump_json, playlist_from_entries, YoutubeEntry};
