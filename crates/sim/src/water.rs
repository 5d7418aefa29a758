//! Water phase: per-box flow proposals computed under a shared lock.

use terrarium_common::{Direction, Region, SimConfig, VoxelCoord};
use terrarium_store::{AttributeField, AttributeStore, StoreAccessors, StoreId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    /// Water falls from `source` into the voxel below.
    Transfer,
    /// Water spreads sideways because the voxel below cannot take it.
    Spread,
    /// Water turns into vapor in place.
    Evaporation,
    /// Vapor turns into water in place.
    Condensation,
    /// Vapor climbs into the voxel above.
    VaporRise,
    /// Vapor blocked from rising drifts sideways.
    VaporDrift,
}

impl FlowKind {
    /// Whether the flow moves vapor rather than water.
    pub fn moves_vapor(self) -> bool {
        matches!(self, Self::VaporRise | Self::VaporDrift)
    }
}

/// A proposed, unapplied change. Phase changes have `source == target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub kind: FlowKind,
    pub source: VoxelCoord,
    pub target: VoxelCoord,
    pub amount: i32,
}

impl Flow {
    fn between(kind: FlowKind, source: VoxelCoord, target: VoxelCoord, amount: i32) -> Self {
        Self {
            kind,
            source,
            target,
            amount,
        }
    }

    pub fn transfer(source: VoxelCoord, target: VoxelCoord, amount: i32) -> Self {
        Self::between(FlowKind::Transfer, source, target, amount)
    }

    pub fn spread(source: VoxelCoord, target: VoxelCoord, amount: i32) -> Self {
        Self::between(FlowKind::Spread, source, target, amount)
    }

    pub fn evaporation(at: VoxelCoord, amount: i32) -> Self {
        Self::between(FlowKind::Evaporation, at, at, amount)
    }

    pub fn condensation(at: VoxelCoord, amount: i32) -> Self {
        Self::between(FlowKind::Condensation, at, at, amount)
    }

    pub fn vapor_rise(source: VoxelCoord, amount: i32) -> Self {
        Self::between(FlowKind::VaporRise, source, source.above(), amount)
    }

    pub fn vapor_drift(source: VoxelCoord, target: VoxelCoord, amount: i32) -> Self {
        Self::between(FlowKind::VaporDrift, source, target, amount)
    }
}

/// Horizontal neighbour offsets for Up, Right, Down, Left.
const LATERAL: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Horizontal neighbours of `c`, starting with the one it faces and going
/// clockwise. Vertical facings start at Up.
fn lateral_neighbours(c: VoxelCoord, facing: Direction) -> impl Iterator<Item = VoxelCoord> {
    let start = match facing {
        Direction::Right => 1,
        Direction::Down => 2,
        Direction::Left => 3,
        Direction::Up | Direction::Upward | Direction::Downward => 0,
    };
    (0..LATERAL.len()).map(move |i| {
        let (dx, dy) = LATERAL[(start + i) % LATERAL.len()];
        c.offset(dx, dy, 0)
    })
}

/// Empty space, or a water tile carrying no liquid.
fn takes_vapor(store: &AttributeStore, acc: &mut StoreAccessors<'_>, c: VoxelCoord) -> bool {
    !acc.terrain_exists(c) || (store.is_water_tile(c) && acc.water(c) == 0)
}

/// State owned by exactly one worker thread.
///
/// The context remembers which store it last read. Handing it a different
/// store resets everything it cached, so nothing from a dropped store
/// survives into the next box.
#[derive(Debug)]
pub struct WorkerContext {
    worker_id: usize,
    bound: Option<StoreId>,
    rebinds: u64,
    boxes_processed: u64,
    flows_emitted: u64,
    cache_hits: u64,
    flows: Vec<Flow>,
}

impl WorkerContext {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            bound: None,
            rebinds: 0,
            boxes_processed: 0,
            flows_emitted: 0,
            cache_hits: 0,
            flows: Vec::new(),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Bind to `store`. A change of store identity clears all cached state.
    pub fn bind(&mut self, store: StoreId) {
        if self.bound == Some(store) {
            return;
        }
        if self.bound.is_some() {
            tracing::debug!(
                worker = self.worker_id,
                store = store.raw(),
                "store changed; resetting worker context"
            );
        }
        self.bound = Some(store);
        self.rebinds += 1;
        self.cache_hits = 0;
        self.flows.clear();
    }

    pub fn bound_store(&self) -> Option<StoreId> {
        self.bound
    }

    pub fn rebinds(&self) -> u64 {
        self.rebinds
    }

    pub fn boxes_processed(&self) -> u64 {
        self.boxes_processed
    }

    pub fn flows_emitted(&self) -> u64 {
        self.flows_emitted
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    /// Hand over the flows of the last box.
    pub fn take_flows(&mut self) -> Vec<Flow> {
        std::mem::take(&mut self.flows)
    }
}

/// Propose flows for every voxel of `region`, visiting Z, then Y, then X.
///
/// Reads only. `world` bounds every target, so no flow leaves the grid.
/// Per voxel of water: fall if the voxel below can take it, otherwise spread
/// to the first lateral neighbour holding at least two units less; then, in
/// sunlight, evaporate. Per voxel of vapor: condense at the threshold,
/// otherwise rise, otherwise drift sideways toward thinner vapor.
pub fn process_box(
    ctx: &mut WorkerContext,
    store: &AttributeStore,
    region: &Region,
    sun_intensity: f32,
    config: &SimConfig,
    world: &Region,
) -> usize {
    ctx.bind(store.id());
    let mut acc = store.accessors();
    let before = ctx.flows.len();

    for (c, w) in store.grid(AttributeField::WaterMatter).iter_region(region) {
        if w <= 0 {
            continue;
        }

        let below = c.below();
        let below_open = world.contains(below)
            && (!acc.terrain_exists(below) || acc.water(below) < config.water_capacity);
        if below_open {
            let room = (config.water_capacity - acc.water(below)).max(0);
            let amount = (w / 2).min(config.max_flow_per_tick).min(room);
            if amount > 0 {
                ctx.flows.push(Flow::transfer(c, below, amount));
            }
        } else {
            let facing = store.get_direction(c);
            for n in lateral_neighbours(c, facing) {
                if !world.contains(n) {
                    continue;
                }
                let nw = acc.water(n);
                let room = (config.water_capacity - nw).max(0);
                let amount = ((w - nw) / 2).min(config.max_flow_per_tick).min(room);
                if amount > 0 {
                    ctx.flows.push(Flow::spread(c, n, amount));
                    break;
                }
            }
        }

        if sun_intensity > 0.0 && w < config.evaporation_threshold {
            let amount = (w / config.evaporation_divisor).max(1);
            ctx.flows.push(Flow::evaporation(c, amount));
        }
    }

    for (c, v) in store.grid(AttributeField::VaporMatter).iter_region(region) {
        if v <= 0 {
            continue;
        }
        if v >= config.condensation_threshold {
            let amount = v / config.condensation_divisor;
            if amount > 0 {
                ctx.flows.push(Flow::condensation(c, amount));
            }
            continue;
        }

        let above = c.above();
        if world.contains(above) && takes_vapor(store, &mut acc, above) {
            ctx.flows.push(Flow::vapor_rise(c, v.min(config.max_flow_per_tick)));
            continue;
        }

        let facing = store.get_direction(c);
        for n in lateral_neighbours(c, facing) {
            if !world.contains(n) || !takes_vapor(store, &mut acc, n) {
                continue;
            }
            let amount = ((v - acc.vapor(n)) / 2).min(config.max_flow_per_tick);
            if amount > 0 {
                ctx.flows.push(Flow::vapor_drift(c, n, amount));
                break;
            }
        }
    }

    let emitted = ctx.flows.len() - before;
    ctx.cache_hits += acc.cache_hits();
    ctx.boxes_processed += 1;
    ctx.flows_emitted += emitted as u64;
    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrarium_common::{EntityType, TerrainKind};

    fn c(x: i32, y: i32, z: i32) -> VoxelCoord {
        VoxelCoord::new(x, y, z)
    }

    fn world() -> Region {
        Region::from_dims(16, 16, 16)
    }

    #[test]
    fn water_falls_into_empty_voxel() {
        let mut store = AttributeStore::new();
        store.set_terrain_id(c(5, 5, 4), -1);
        store.set_water_matter(c(5, 5, 4), 10);

        let mut ctx = WorkerContext::new(0);
        let cfg = SimConfig::default();
        let n = process_box(&mut ctx, &store, &world(), 0.0, &cfg, &world());
        assert_eq!(n, 1);
        assert_eq!(ctx.take_flows(), vec![Flow::transfer(c(5, 5, 4), c(5, 5, 3), 5)]);
    }

    #[test]
    fn transfer_is_capped_by_config_and_room() {
        let mut store = AttributeStore::new();
        store.set_terrain_id(c(1, 1, 2), -1);
        store.set_water_matter(c(1, 1, 2), 90);
        store.set_terrain_id(c(1, 1, 1), -1);
        store.set_water_matter(c(1, 1, 1), 97);

        let cfg = SimConfig::default();
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &world(), 0.0, &cfg, &world());
        let flows = ctx.take_flows();
        // (1,1,1) has room for 3; (1,1,0) is empty and takes the capped 10.
        assert!(flows.contains(&Flow::transfer(c(1, 1, 2), c(1, 1, 1), 3)));
        assert!(flows.contains(&Flow::transfer(c(1, 1, 1), c(1, 1, 0), 10)));
    }

    #[test]
    fn floor_water_spreads_instead_of_leaving_the_world() {
        let mut store = AttributeStore::new();
        store.set_water_matter(c(0, 0, 0), 40);
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &world(), 0.0, &SimConfig::default(), &world());
        // Facing Up points at y = -1, outside the world; the next clockwise
        // neighbour takes the spread.
        assert_eq!(ctx.take_flows(), vec![Flow::spread(c(0, 0, 0), c(1, 0, 0), 10)]);
    }

    #[test]
    fn blocked_water_spreads_in_its_facing_first() {
        let mut store = AttributeStore::new();
        store.set_terrain_id(c(4, 4, 1), -1);
        store.set_water_matter(c(4, 4, 1), 100);
        store.set_terrain_id(c(4, 4, 2), -1);
        store.set_water_matter(c(4, 4, 2), 12);
        store.set_direction(c(4, 4, 2), Direction::Left);
        // The Left neighbour is already level; Up is next.
        store.set_water_matter(c(3, 4, 2), 11);

        let mut ctx = WorkerContext::new(0);
        let cfg = SimConfig::default();
        let region = Region::new(c(0, 0, 2), c(15, 15, 2));
        process_box(&mut ctx, &store, &region, 0.0, &cfg, &world());
        let from_blocked: Vec<_> = ctx
            .take_flows()
            .into_iter()
            .filter(|f| f.source == c(4, 4, 2))
            .collect();
        assert_eq!(from_blocked, vec![Flow::spread(c(4, 4, 2), c(4, 3, 2), 6)]);
    }

    #[test]
    fn level_water_stays_put() {
        let mut store = AttributeStore::new();
        store.set_water_matter(c(5, 5, 0), 7);
        for n in lateral_neighbours(c(5, 5, 0), Direction::Up) {
            store.set_water_matter(n, 6);
        }
        let region = Region::new(c(5, 5, 0), c(5, 5, 0));
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &region, 0.0, &SimConfig::default(), &world());
        assert!(ctx.take_flows().is_empty());
    }

    #[test]
    fn evaporation_needs_sun() {
        let mut store = AttributeStore::new();
        store.set_water_matter(c(3, 3, 0), 30);
        let cfg = SimConfig::default();
        let evaporation = |ctx: &mut WorkerContext| -> Vec<Flow> {
            ctx.take_flows()
                .into_iter()
                .filter(|f| f.kind == FlowKind::Evaporation)
                .collect()
        };

        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &world(), 0.0, &cfg, &world());
        assert!(evaporation(&mut ctx).is_empty());

        process_box(&mut ctx, &store, &world(), 1.0, &cfg, &world());
        assert_eq!(evaporation(&mut ctx), vec![Flow::evaporation(c(3, 3, 0), 3)]);

        store.set_water_matter(c(3, 3, 0), 4);
        process_box(&mut ctx, &store, &world(), 1.0, &cfg, &world());
        assert_eq!(evaporation(&mut ctx), vec![Flow::evaporation(c(3, 3, 0), 1)]);
    }

    #[test]
    fn dense_vapor_condenses_and_thin_vapor_rises() {
        let mut store = AttributeStore::new();
        store.set_vapor_matter(c(2, 2, 0), 25);
        store.set_vapor_matter(c(3, 2, 0), 19);
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &world(), 0.0, &SimConfig::default(), &world());
        assert_eq!(
            ctx.take_flows(),
            vec![
                Flow::condensation(c(2, 2, 0), 12),
                Flow::vapor_rise(c(3, 2, 0), 10),
            ]
        );
    }

    #[test]
    fn vapor_rises_through_vapor_but_not_liquid() {
        let mut store = AttributeStore::new();
        // Vapor-only water tile above: rising merges into it.
        store.set_vapor_matter(c(1, 1, 3), 4);
        store.set_terrain_id(c(1, 1, 4), -1);
        store.set_entity_type(c(1, 1, 4), EntityType::terrain(TerrainKind::Water));
        store.set_vapor_matter(c(1, 1, 4), 15);
        // Liquid above blocks; the vapor drifts to its facing neighbour.
        store.set_vapor_matter(c(6, 6, 3), 8);
        store.set_terrain_id(c(6, 6, 4), -1);
        store.set_entity_type(c(6, 6, 4), EntityType::terrain(TerrainKind::Water));
        store.set_water_matter(c(6, 6, 4), 50);
        store.set_direction(c(6, 6, 3), Direction::Down);

        let region = Region::new(c(0, 0, 3), c(15, 15, 3));
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &region, 0.0, &SimConfig::default(), &world());
        let flows = ctx.take_flows();
        assert!(flows.contains(&Flow::vapor_rise(c(1, 1, 3), 4)));
        assert!(flows.contains(&Flow::vapor_drift(c(6, 6, 3), c(6, 7, 3), 4)));
        assert!(flows.iter().all(|f| f.kind.moves_vapor()));
    }

    #[test]
    fn vapor_at_the_ceiling_drifts_toward_thinner_vapor() {
        let mut store = AttributeStore::new();
        let top = c(8, 8, 15);
        store.set_vapor_matter(top, 9);
        store.set_vapor_matter(c(8, 7, 15), 9);
        store.set_vapor_matter(c(9, 8, 15), 2);
        let region = Region::new(top, top);
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &region, 0.0, &SimConfig::default(), &world());
        assert_eq!(ctx.take_flows(), vec![Flow::vapor_drift(top, c(9, 8, 15), 3)]);
    }

    #[test]
    fn only_voxels_inside_the_box_are_visited() {
        let mut store = AttributeStore::new();
        store.set_water_matter(c(1, 1, 5), 10);
        store.set_water_matter(c(9, 9, 5), 10);
        let region = Region::new(c(0, 0, 0), c(7, 7, 7));
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &region, 0.0, &SimConfig::default(), &world());
        let flows = ctx.take_flows();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].source, c(1, 1, 5));
    }

    #[test]
    fn flows_come_out_in_z_y_x_order() {
        let mut store = AttributeStore::new();
        for coord in [c(2, 0, 3), c(0, 1, 2), c(1, 0, 2), c(0, 0, 3)] {
            store.set_water_matter(coord, 8);
        }
        let mut ctx = WorkerContext::new(0);
        process_box(&mut ctx, &store, &world(), 0.0, &SimConfig::default(), &world());
        let sources: Vec<_> = ctx.take_flows().iter().map(|f| f.source).collect();
        assert_eq!(sources, vec![c(1, 0, 2), c(0, 1, 2), c(0, 0, 3), c(2, 0, 3)]);
    }

    #[test]
    fn rebinding_to_another_store_resets_context() {
        let a = AttributeStore::new();
        let b = AttributeStore::new();
        let mut ctx = WorkerContext::new(7);
        let cfg = SimConfig::default();

        process_box(&mut ctx, &a, &world(), 0.0, &cfg, &world());
        process_box(&mut ctx, &a, &world(), 0.0, &cfg, &world());
        assert_eq!(ctx.rebinds(), 1);
        assert_eq!(ctx.bound_store(), Some(a.id()));

        process_box(&mut ctx, &b, &world(), 0.0, &cfg, &world());
        assert_eq!(ctx.rebinds(), 2);
        assert_eq!(ctx.bound_store(), Some(b.id()));
        assert_eq!(ctx.boxes_processed(), 3);
        assert_eq!(ctx.worker_id(), 7);
    }
}
