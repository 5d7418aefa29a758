//! Concurrent water simulation over a [`terrarium_kernel::TerrainRepository`].
//!
//! The world is cut into boxes. Workers pull box tasks from a FIFO
//! scheduler, read the terrain under a shared lock and emit [`Flow`]
//! proposals into a result queue. A single aggregation pass applies every
//! queued flow under one exclusive lock.
//!
//! # Invariants
//! - Workers never write to the terrain grid.
//! - Each worker owns its [`WorkerContext`]; contexts are never shared.
//! - Aggregation conserves the grand total of matter.
//! - No box extends past the world bounds.

pub mod aggregate;
pub mod manager;
pub mod partition;
pub mod scheduler;
pub mod water;

pub use aggregate::{ApplyReport, apply_flows};
pub use manager::{AggregateReport, SimError, SimStats, SimulationManager, TickReport};
pub use partition::{box_count, partition_into_boxes};
pub use scheduler::{BoxTask, TaskScheduler};
pub use water::{Flow, FlowKind, WorkerContext, process_box};

pub fn crate_info() -> &'static str {
    "terrarium-sim v0.1.0"
}
