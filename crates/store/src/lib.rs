//! Sparse Attribute Store: static per-voxel terrain state.
//!
//! # Invariants
//! - Each attribute is its own sparse grid with its own background value.
//! - Reads never fail; absence is the background value.
//! - No internal synchronization. Callers serialize access.
//! - Flag fields occupy disjoint bit ranges and are written through masks.

pub mod attributes;
pub mod flags;
pub mod grid;

pub use attributes::{
    AttributeField, AttributeStore, NO_TERRAIN, STATIC_TERRAIN, StaticAttributes, StoreAccessors,
    StoreId,
};
pub use flags::PackedFlags;
pub use grid::{GridAccessor, SparseGrid};

pub fn crate_info() -> &'static str {
    "terrarium-store v0.1.0"
}
