//! Terrain kernel: the repository that owns static voxel storage and the
//! entity overlay for active voxels, plus the bounded voxel grid facade.
//!
//! # Invariants
//! - All terrain mutations flow through a [`TerrainGridLock`].
//! - Entity lifetime belongs to the repository; the attribute store never
//!   sees entities, only their indices.

pub mod repository;
pub mod voxel_grid;

pub use repository::{
    RepositoryEvent, TerrainError, TerrainGridLock, TerrainGridRead, TerrainInfo,
    TerrainRepository, TransientInfo, TransientTick,
};
pub use voxel_grid::{GridData, VoxelGrid};

pub fn crate_info() -> &'static str {
    "terrarium-kernel v0.1.0"
}
