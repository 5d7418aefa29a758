//! Shared voxel types for the terrarium workspace.
//!
//! # Invariants
//! - Coordinates are plain integer triples; no crate below the voxel grid
//!   facade imposes bounds on them.
//! - Regions are inclusive on both ends and iterate Z, then Y, then X.
//! - Enum discriminants match the values persisted in the packed flag word
//!   and the type grids, and never change.

pub mod config;
pub mod coord;
pub mod types;

pub use config::{ConfigError, SimConfig};
pub use coord::{Region, VoxelCoord};
pub use types::{
    Direction, EntityKind, EntityType, GradientVector, MatterContainer, MatterState, MatterTotals,
    PhysicsStats, StructuralIntegrity, TerrainKind, Velocity,
};

pub fn crate_info() -> &'static str {
    "terrarium-common v0.1.0"
}
