//! Apply a batch of flows under one exclusive lock.

use crate::water::{Flow, FlowKind};
use std::collections::HashMap;
use terrarium_common::{EntityType, MatterState, SimConfig, TerrainKind, VoxelCoord};
use terrarium_kernel::TerrainGridLock;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Flows applied in full.
    pub applied: usize,
    /// Flows applied with a reduced amount.
    pub clamped: usize,
    /// Flows with nothing left to move.
    pub dropped: usize,
    /// Voxels that became water tiles because water or vapor arrived.
    pub materialized: usize,
    /// Water tiles removed because nothing was left in them.
    pub cleared: usize,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    water: i32,
    vapor: i32,
    orig_water: i32,
    orig_vapor: i32,
}

/// Read-once view of the amounts a batch touches.
struct Ledger<'g, 'a> {
    guard: &'g TerrainGridLock<'a>,
    entries: HashMap<VoxelCoord, Entry>,
}

impl<'g, 'a> Ledger<'g, 'a> {
    fn new(guard: &'g TerrainGridLock<'a>) -> Self {
        Self {
            guard,
            entries: HashMap::new(),
        }
    }

    fn entry(&mut self, c: VoxelCoord) -> &mut Entry {
        let guard = self.guard;
        self.entries.entry(c).or_insert_with(|| {
            let water = guard.get_water_matter(c);
            let vapor = guard.get_vapor_matter(c);
            Entry {
                water,
                vapor,
                orig_water: water,
                orig_vapor: vapor,
            }
        })
    }
}

/// Apply `flows` to the grid held by `guard`.
///
/// Every touched amount is read once before any write. Each flow is clamped
/// to what its source still holds (and, for water, to the room left at its
/// target), so the batch never creates or destroys matter and never drives
/// an amount negative.
///
/// Afterwards a touched voxel without terrain that now holds water or vapor
/// becomes a static water tile, and a touched water tile left with no matter
/// at all is deleted. Deleting an active tile queues its entity for
/// destruction, so call [`TerrainRepository::process_deferred`] once the
/// guard is released.
///
/// [`TerrainRepository::process_deferred`]: terrarium_kernel::TerrainRepository::process_deferred
pub fn apply_flows(guard: &mut TerrainGridLock<'_>, flows: &[Flow], config: &SimConfig) -> ApplyReport {
    let mut report = ApplyReport::default();
    if flows.is_empty() {
        return report;
    }

    let mut ledger = Ledger::new(guard);
    for flow in flows {
        if flow.amount <= 0 {
            report.dropped += 1;
            continue;
        }
        let moved = match flow.kind {
            FlowKind::Transfer | FlowKind::Spread => {
                let available = ledger.entry(flow.source).water;
                let room = (config.water_capacity - ledger.entry(flow.target).water).max(0);
                let amount = flow.amount.min(available).min(room);
                if amount > 0 {
                    ledger.entry(flow.source).water -= amount;
                    ledger.entry(flow.target).water += amount;
                }
                amount
            }
            FlowKind::Evaporation => {
                let e = ledger.entry(flow.source);
                let amount = flow.amount.min(e.water);
                if amount > 0 {
                    e.water -= amount;
                    e.vapor += amount;
                }
                amount
            }
            FlowKind::Condensation => {
                let e = ledger.entry(flow.source);
                let room = (config.water_capacity - e.water).max(0);
                let amount = flow.amount.min(e.vapor).min(room);
                if amount > 0 {
                    e.vapor -= amount;
                    e.water += amount;
                }
                amount
            }
            FlowKind::VaporRise | FlowKind::VaporDrift => {
                let amount = flow.amount.min(ledger.entry(flow.source).vapor);
                if amount > 0 {
                    ledger.entry(flow.source).vapor -= amount;
                    ledger.entry(flow.target).vapor += amount;
                }
                amount
            }
        };
        match moved {
            m if m <= 0 => report.dropped += 1,
            m if m < flow.amount => report.clamped += 1,
            _ => report.applied += 1,
        }
    }

    let entries = ledger.entries;
    for (c, e) in entries {
        if e.water != e.orig_water {
            guard.set_water_matter(c, e.water);
        }
        if e.vapor != e.orig_vapor {
            guard.set_vapor_matter(c, e.vapor);
        }
        let holds_water = e.water > 0 || e.vapor > 0;
        let phase = if e.water > 0 {
            MatterState::Liquid
        } else {
            MatterState::Gas
        };
        if !guard.check_if_terrain_exists(c) {
            if holds_water {
                guard.mark_terrain(c, EntityType::terrain(TerrainKind::Water));
                guard.set_matter_state(c, phase);
                report.materialized += 1;
            }
        } else if guard.is_water_tile(c) {
            if !holds_water {
                if guard.get_terrain_matter(c) == 0 && guard.get_biomass_matter(c) == 0 {
                    guard.delete_terrain(c);
                    report.cleared += 1;
                }
            } else if guard.get_matter_state(c) != phase {
                guard.set_matter_state(c, phase);
            }
        }
    }

    tracing::debug!(
        flows = flows.len(),
        applied = report.applied,
        clamped = report.clamped,
        dropped = report.dropped,
        materialized = report.materialized,
        cleared = report.cleared,
        "applied flow batch"
    );
    report
}
