pub mod acquisition;
pub mod analysis;
pub mod cancel;
pub mod fingerprint;
pub mod library_index;
pub mod poller;
pub mod resolver;
pub mod scan;
pub mod sync;
pub mod sync_status;
pub mod verifier;
pub mod wishlist;

pub use acquisition::{AcquisitionConfig, AcquisitionSupervisor, RunSummary};
pub use analysis::{AnalysisPool, TrackAnalysis};
pub use cancel::CancelFlag;
pub use fingerprint::{AudioVerifier, FingerprintVerifier};
pub use library_index::{LibraryIndex, LibraryMatch};
pub use poller::{PollerEvent, TransferPoller, TransferRegistry};
pub use resolver::{ExternalIdResolver, ResolveStrategy, ResolvedTrack};
pub use scan::{ScanConfig, ScanCoordinator};
pub use sync::{PlaylistSyncService, SyncReport};
pub use sync_status::{SyncRecord, SyncState, SyncStatusStore};
pub use verifier::{CandidateVerifier, QualityPreference};
pub use wishlist::{wishlist_key, WishlistStore};
