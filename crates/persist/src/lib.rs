//! Persistence: region snapshots and a file-backed, hash-chained store.
//!
//! # Invariants
//! - Region files are append-only and listed in the manifest hash chain.
//! - Snapshots carry a content hash and are verified on load and restore.
//! - Integer matter, mass and packed flag bits round-trip exactly.
//! - Transient state is never persisted; restored terrain is static.

pub mod snapshot;
pub mod store;

pub use snapshot::{RegionSnapshot, VoxelRecord};
pub use store::{IntegrityManifest, ManifestEntry, StoreError, WorldMeta, WorldStore};

pub fn crate_info() -> &'static str {
    "terrarium-persist v0.1.0"
}
