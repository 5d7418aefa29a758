//! Static per-voxel terrain attributes.
//!
//! One [`SparseGrid`] per field, all sharing a coordinate space. The store
//! has no locks and no knowledge of entities; the repository above it does
//! both.
//!
//! # Invariants
//! - Never-written coordinates read every field's background value.
//! - `terrain_id == -2` means no terrain. `-1` means static-only terrain.
//!   Anything `>= 0` is owned by an entity with that index.
//! - `delete_terrain` clears every field, so a deleted voxel is
//!   indistinguishable from a never-written one.

use crate::flags::PackedFlags;
use crate::grid::{GridAccessor, SparseGrid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use terrarium_common::{
    Direction, EntityKind, EntityType, GradientVector, MatterContainer, MatterState, MatterTotals,
    PhysicsStats, Region, StructuralIntegrity, TerrainKind, VoxelCoord,
};

/// No terrain at this voxel.
pub const NO_TERRAIN: i32 = -2;
/// Terrain exists but is not backed by an entity.
pub const STATIC_TERRAIN: i32 = -1;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`AttributeStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Integer-valued fields addressable by [`AttributeStore::iterate_grid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeField {
    TerrainId,
    MainType,
    SubType0,
    SubType1,
    TerrainMatter,
    WaterMatter,
    VaporMatter,
    BiomassMatter,
    Mass,
    MaxSpeed,
    MinSpeed,
    MaxLoadCapacity,
}

impl AttributeField {
    pub const ALL: [AttributeField; 12] = [
        Self::TerrainId,
        Self::MainType,
        Self::SubType0,
        Self::SubType1,
        Self::TerrainMatter,
        Self::WaterMatter,
        Self::VaporMatter,
        Self::BiomassMatter,
        Self::Mass,
        Self::MaxSpeed,
        Self::MinSpeed,
        Self::MaxLoadCapacity,
    ];
}

/// Every static field of one voxel, read or written in one call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StaticAttributes {
    pub terrain_id: i32,
    pub entity_type: EntityType,
    pub matter: MatterContainer,
    pub physics: PhysicsStats,
    pub flags: PackedFlags,
    pub max_load_capacity: i32,
}

impl Default for StaticAttributes {
    fn default() -> Self {
        Self {
            terrain_id: NO_TERRAIN,
            entity_type: EntityType::default(),
            matter: MatterContainer::default(),
            physics: PhysicsStats::default(),
            flags: PackedFlags::EMPTY,
            max_load_capacity: 0,
        }
    }
}

pub struct AttributeStore {
    id: StoreId,
    terrain_id: SparseGrid<i32>,
    main_type: SparseGrid<i32>,
    sub_type0: SparseGrid<i32>,
    sub_type1: SparseGrid<i32>,
    terrain_matter: SparseGrid<i32>,
    water_matter: SparseGrid<i32>,
    vapor_matter: SparseGrid<i32>,
    biomass_matter: SparseGrid<i32>,
    mass: SparseGrid<i32>,
    max_speed: SparseGrid<i32>,
    min_speed: SparseGrid<i32>,
    flags: SparseGrid<u32>,
    max_load_capacity: SparseGrid<i32>,
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStore")
            .field("id", &self.id)
            .field("terrain_voxels", &self.terrain_id.active_count())
            .field("leaves", &self.terrain_id.leaf_count())
            .finish()
    }
}

impl AttributeStore {
    pub fn new() -> Self {
        Self {
            id: StoreId::next(),
            terrain_id: SparseGrid::new(NO_TERRAIN),
            main_type: SparseGrid::new(0),
            sub_type0: SparseGrid::new(0),
            sub_type1: SparseGrid::new(-1),
            terrain_matter: SparseGrid::new(0),
            water_matter: SparseGrid::new(0),
            vapor_matter: SparseGrid::new(0),
            biomass_matter: SparseGrid::new(0),
            mass: SparseGrid::new(0),
            max_speed: SparseGrid::new(0),
            min_speed: SparseGrid::new(0),
            flags: SparseGrid::new(0),
            max_load_capacity: SparseGrid::new(0),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn grid(&self, field: AttributeField) -> &SparseGrid<i32> {
        match field {
            AttributeField::TerrainId => &self.terrain_id,
            AttributeField::MainType => &self.main_type,
            AttributeField::SubType0 => &self.sub_type0,
            AttributeField::SubType1 => &self.sub_type1,
            AttributeField::TerrainMatter => &self.terrain_matter,
            AttributeField::WaterMatter => &self.water_matter,
            AttributeField::VaporMatter => &self.vapor_matter,
            AttributeField::BiomassMatter => &self.biomass_matter,
            AttributeField::Mass => &self.mass,
            AttributeField::MaxSpeed => &self.max_speed,
            AttributeField::MinSpeed => &self.min_speed,
            AttributeField::MaxLoadCapacity => &self.max_load_capacity,
        }
    }

    fn grid_mut(&mut self, field: AttributeField) -> &mut SparseGrid<i32> {
        match field {
            AttributeField::TerrainId => &mut self.terrain_id,
            AttributeField::MainType => &mut self.main_type,
            AttributeField::SubType0 => &mut self.sub_type0,
            AttributeField::SubType1 => &mut self.sub_type1,
            AttributeField::TerrainMatter => &mut self.terrain_matter,
            AttributeField::WaterMatter => &mut self.water_matter,
            AttributeField::VaporMatter => &mut self.vapor_matter,
            AttributeField::BiomassMatter => &mut self.biomass_matter,
            AttributeField::Mass => &mut self.mass,
            AttributeField::MaxSpeed => &mut self.max_speed,
            AttributeField::MinSpeed => &mut self.min_speed,
            AttributeField::MaxLoadCapacity => &mut self.max_load_capacity,
        }
    }

    // --- Terrain id ---
    pub fn get_terrain_id(&self, c: VoxelCoord) -> i32 {
        self.terrain_id.get(c)
    }

    pub fn set_terrain_id(&mut self, c: VoxelCoord, id: i32) {
        self.terrain_id.set(c, id);
    }

    /// The stored id, or `None` if the voxel was never marked as terrain.
    pub fn get_terrain_id_if_exists(&self, c: VoxelCoord) -> Option<i32> {
        let id = self.terrain_id.get(c);
        (id != NO_TERRAIN).then_some(id)
    }

    pub fn check_if_terrain_exists(&self, c: VoxelCoord) -> bool {
        self.terrain_id.get(c) != NO_TERRAIN
    }

    // --- Type ---
    pub fn get_main_type(&self, c: VoxelCoord) -> i32 {
        self.main_type.get(c)
    }

    pub fn set_main_type(&mut self, c: VoxelCoord, v: i32) {
        self.main_type.set(c, v);
    }

    pub fn get_sub_type0(&self, c: VoxelCoord) -> i32 {
        self.sub_type0.get(c)
    }

    pub fn set_sub_type0(&mut self, c: VoxelCoord, v: i32) {
        self.sub_type0.set(c, v);
    }

    pub fn get_sub_type1(&self, c: VoxelCoord) -> i32 {
        self.sub_type1.get(c)
    }

    pub fn set_sub_type1(&mut self, c: VoxelCoord, v: i32) {
        self.sub_type1.set(c, v);
    }

    pub fn entity_type(&self, c: VoxelCoord) -> EntityType {
        EntityType {
            main_type: self.main_type.get(c),
            sub_type0: self.sub_type0.get(c),
            sub_type1: self.sub_type1.get(c),
        }
    }

    /// Whether `c` holds terrain typed as a water tile.
    pub fn is_water_tile(&self, c: VoxelCoord) -> bool {
        self.check_if_terrain_exists(c)
            && self.main_type.get(c) == EntityKind::Terrain.as_raw()
            && self.sub_type0.get(c) == TerrainKind::Water.as_raw()
    }

    pub fn set_entity_type(&mut self, c: VoxelCoord, t: EntityType) {
        self.main_type.set(c, t.main_type);
        self.sub_type0.set(c, t.sub_type0);
        self.sub_type1.set(c, t.sub_type1);
    }

    // --- Matter ---
    pub fn get_terrain_matter(&self, c: VoxelCoord) -> i32 {
        self.terrain_matter.get(c)
    }

    pub fn set_terrain_matter(&mut self, c: VoxelCoord, v: i32) {
        self.terrain_matter.set(c, v);
    }

    pub fn get_water_matter(&self, c: VoxelCoord) -> i32 {
        self.water_matter.get(c)
    }

    pub fn set_water_matter(&mut self, c: VoxelCoord, v: i32) {
        self.water_matter.set(c, v);
    }

    pub fn get_vapor_matter(&self, c: VoxelCoord) -> i32 {
        self.vapor_matter.get(c)
    }

    pub fn set_vapor_matter(&mut self, c: VoxelCoord, v: i32) {
        self.vapor_matter.set(c, v);
    }

    pub fn get_biomass_matter(&self, c: VoxelCoord) -> i32 {
        self.biomass_matter.get(c)
    }

    pub fn set_biomass_matter(&mut self, c: VoxelCoord, v: i32) {
        self.biomass_matter.set(c, v);
    }

    pub fn matter_container(&self, c: VoxelCoord) -> MatterContainer {
        MatterContainer {
            terrain: self.terrain_matter.get(c),
            water: self.water_matter.get(c),
            vapor: self.vapor_matter.get(c),
            biomass: self.biomass_matter.get(c),
        }
    }

    pub fn set_matter_container(&mut self, c: VoxelCoord, m: MatterContainer) {
        self.terrain_matter.set(c, m.terrain);
        self.water_matter.set(c, m.water);
        self.vapor_matter.set(c, m.vapor);
        self.biomass_matter.set(c, m.biomass);
    }

    // --- Physics ---
    pub fn get_mass(&self, c: VoxelCoord) -> i32 {
        self.mass.get(c)
    }

    pub fn set_mass(&mut self, c: VoxelCoord, v: i32) {
        self.mass.set(c, v);
    }

    pub fn get_max_speed(&self, c: VoxelCoord) -> i32 {
        self.max_speed.get(c)
    }

    pub fn set_max_speed(&mut self, c: VoxelCoord, v: i32) {
        self.max_speed.set(c, v);
    }

    pub fn get_min_speed(&self, c: VoxelCoord) -> i32 {
        self.min_speed.get(c)
    }

    pub fn set_min_speed(&mut self, c: VoxelCoord, v: i32) {
        self.min_speed.set(c, v);
    }

    pub fn physics_stats(&self, c: VoxelCoord) -> PhysicsStats {
        PhysicsStats {
            mass: self.mass.get(c),
            max_speed: self.max_speed.get(c),
            min_speed: self.min_speed.get(c),
        }
    }

    pub fn set_physics_stats(&mut self, c: VoxelCoord, p: PhysicsStats) {
        self.mass.set(c, p.mass);
        self.max_speed.set(c, p.max_speed);
        self.min_speed.set(c, p.min_speed);
    }

    // --- Flags ---
    pub fn get_flags(&self, c: VoxelCoord) -> PackedFlags {
        PackedFlags(self.flags.get(c))
    }

    pub fn set_flags(&mut self, c: VoxelCoord, flags: PackedFlags) {
        self.flags.set(c, flags.bits());
    }

    fn update_flags(&mut self, c: VoxelCoord, f: impl FnOnce(PackedFlags) -> PackedFlags) {
        let updated = f(self.get_flags(c));
        self.set_flags(c, updated);
    }

    pub fn get_direction(&self, c: VoxelCoord) -> Direction {
        self.get_flags(c).direction()
    }

    pub fn set_direction(&mut self, c: VoxelCoord, d: Direction) {
        self.update_flags(c, |f| f.with_direction(d));
    }

    pub fn get_can_stack_entities(&self, c: VoxelCoord) -> bool {
        self.get_flags(c).can_stack()
    }

    pub fn set_can_stack_entities(&mut self, c: VoxelCoord, can_stack: bool) {
        self.update_flags(c, |f| f.with_can_stack(can_stack));
    }

    pub fn get_matter_state(&self, c: VoxelCoord) -> MatterState {
        self.get_flags(c).matter_state()
    }

    pub fn set_matter_state(&mut self, c: VoxelCoord, s: MatterState) {
        self.update_flags(c, |f| f.with_matter_state(s));
    }

    pub fn get_gradient(&self, c: VoxelCoord) -> GradientVector {
        self.get_flags(c).gradient()
    }

    pub fn set_gradient(&mut self, c: VoxelCoord, g: GradientVector) {
        self.update_flags(c, |f| f.with_gradient(g));
    }

    // --- Structural integrity ---
    pub fn get_max_load_capacity(&self, c: VoxelCoord) -> i32 {
        self.max_load_capacity.get(c)
    }

    pub fn set_max_load_capacity(&mut self, c: VoxelCoord, v: i32) {
        self.max_load_capacity.set(c, v);
    }

    pub fn structural_integrity(&self, c: VoxelCoord) -> StructuralIntegrity {
        let flags = self.get_flags(c);
        StructuralIntegrity {
            can_stack_entities: flags.can_stack(),
            max_load_capacity: self.max_load_capacity.get(c),
            matter_state: flags.matter_state(),
            gradient: flags.gradient(),
        }
    }

    /// Writes the stack, state and gradient bits; direction bits are kept.
    pub fn set_structural_integrity(&mut self, c: VoxelCoord, s: StructuralIntegrity) {
        self.update_flags(c, |f| {
            f.with_can_stack(s.can_stack_entities)
                .with_matter_state(s.matter_state)
                .with_gradient(s.gradient)
        });
        self.max_load_capacity.set(c, s.max_load_capacity);
    }

    // --- Whole-voxel operations ---

    pub fn static_attributes(&self, c: VoxelCoord) -> StaticAttributes {
        StaticAttributes {
            terrain_id: self.terrain_id.get(c),
            entity_type: self.entity_type(c),
            matter: self.matter_container(c),
            physics: self.physics_stats(c),
            flags: self.get_flags(c),
            max_load_capacity: self.max_load_capacity.get(c),
        }
    }

    /// Overwrite every field of `c`. Background values deactivate the voxel
    /// in that field's grid instead of storing it.
    pub fn apply_static_attributes(&mut self, c: VoxelCoord, a: &StaticAttributes) {
        self.terrain_id.assign(c, a.terrain_id);
        self.main_type.assign(c, a.entity_type.main_type);
        self.sub_type0.assign(c, a.entity_type.sub_type0);
        self.sub_type1.assign(c, a.entity_type.sub_type1);
        self.terrain_matter.assign(c, a.matter.terrain);
        self.water_matter.assign(c, a.matter.water);
        self.vapor_matter.assign(c, a.matter.vapor);
        self.biomass_matter.assign(c, a.matter.biomass);
        self.mass.assign(c, a.physics.mass);
        self.max_speed.assign(c, a.physics.max_speed);
        self.min_speed.assign(c, a.physics.min_speed);
        self.flags.assign(c, a.flags.bits());
        self.max_load_capacity.assign(c, a.max_load_capacity);
    }

    /// Clear `c` across every grid. Returns the terrain id stored before the
    /// call, `-2` if there was none.
    pub fn delete_terrain(&mut self, c: VoxelCoord) -> i32 {
        let previous = self.terrain_id.get(c);
        for field in AttributeField::ALL {
            self.grid_mut(field).set_off(c);
        }
        self.flags.set_off(c);
        tracing::trace!(%c, previous, "terrain deleted");
        previous
    }

    /// Whether any field holds a non-background value at `c`.
    pub fn has_any_data(&self, c: VoxelCoord) -> bool {
        AttributeField::ALL.iter().any(|&f| {
            let g = self.grid(f);
            g.get(c) != g.background()
        }) || self.flags.get(c) != 0
    }

    // --- Iteration ---

    /// Visit every active voxel of `field` whose value is at least `min_value`.
    pub fn iterate_grid(
        &self,
        field: AttributeField,
        min_value: i32,
        mut callback: impl FnMut(VoxelCoord, i32),
    ) {
        for (c, v) in self.grid(field).iter_on() {
            if v >= min_value {
                callback(c, v);
            }
        }
    }

    pub fn iterate_water_matter(&self, callback: impl FnMut(VoxelCoord, i32)) {
        self.iterate_grid(AttributeField::WaterMatter, 1, callback);
    }

    pub fn iterate_vapor_matter(&self, callback: impl FnMut(VoxelCoord, i32)) {
        self.iterate_grid(AttributeField::VaporMatter, 1, callback);
    }

    pub fn iterate_biomass_matter(&self, callback: impl FnMut(VoxelCoord, i32)) {
        self.iterate_grid(AttributeField::BiomassMatter, 1, callback);
    }

    /// Terrain voxels in `region` with their ids, in Z-Y-X order.
    pub fn terrain_in_region(&self, region: &Region) -> Vec<(VoxelCoord, i32)> {
        self.terrain_id
            .iter_region(region)
            .into_iter()
            .filter(|(_, id)| *id != NO_TERRAIN)
            .collect()
    }

    /// Coordinates in `region` where any field differs from its background.
    pub fn non_background_in_region(&self, region: &Region) -> Vec<VoxelCoord> {
        let mut coords = BTreeSet::new();
        for field in AttributeField::ALL {
            let g = self.grid(field);
            let bg = g.background();
            coords.extend(
                g.iter_region(region)
                    .into_iter()
                    .filter(|(_, v)| *v != bg)
                    .map(|(c, _)| (c.z, c.y, c.x)),
            );
        }
        coords.extend(
            self.flags
                .iter_region(region)
                .into_iter()
                .filter(|(_, v)| *v != 0)
                .map(|(c, _)| (c.z, c.y, c.x)),
        );
        coords
            .into_iter()
            .map(|(z, y, x)| VoxelCoord::new(x, y, z))
            .collect()
    }

    /// Total of each matter kind across the whole store.
    pub fn matter_totals(&self) -> MatterTotals {
        let sum = |g: &SparseGrid<i32>| g.iter_on().map(|(_, v)| i64::from(v)).sum::<i64>();
        MatterTotals {
            terrain: sum(&self.terrain_matter),
            water: sum(&self.water_matter),
            vapor: sum(&self.vapor_matter),
            biomass: sum(&self.biomass_matter),
        }
    }

    pub fn terrain_count(&self) -> usize {
        self.terrain_id
            .iter_on()
            .filter(|(_, id)| *id != NO_TERRAIN)
            .count()
    }

    // --- Maintenance ---

    pub fn clear(&mut self) {
        for field in AttributeField::ALL {
            self.grid_mut(field).clear();
        }
        self.flags.clear();
    }

    /// Drop empty leaves in every grid. Returns the number dropped.
    pub fn prune(&mut self) -> usize {
        let mut dropped = 0;
        for field in AttributeField::ALL {
            dropped += self.grid_mut(field).prune();
        }
        dropped += self.flags.prune();
        tracing::debug!(dropped, "attribute store pruned");
        dropped
    }

    pub fn mem_usage(&self) -> usize {
        AttributeField::ALL
            .iter()
            .map(|&f| self.grid(f).mem_usage())
            .sum::<usize>()
            + self.flags.mem_usage()
    }

    /// Cached accessors over the grids the simulation reads.
    pub fn accessors(&self) -> StoreAccessors<'_> {
        StoreAccessors {
            store_id: self.id,
            terrain_id: self.terrain_id.accessor(),
            water: self.water_matter.accessor(),
            vapor: self.vapor_matter.accessor(),
        }
    }
}

/// Leaf-caching read accessors bound to one store borrow.
pub struct StoreAccessors<'a> {
    store_id: StoreId,
    terrain_id: GridAccessor<'a, i32>,
    water: GridAccessor<'a, i32>,
    vapor: GridAccessor<'a, i32>,
}

impl StoreAccessors<'_> {
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn terrain_exists(&mut self, c: VoxelCoord) -> bool {
        self.terrain_id.get(c) != NO_TERRAIN
    }

    pub fn terrain_id(&mut self, c: VoxelCoord) -> i32 {
        self.terrain_id.get(c)
    }

    pub fn water(&mut self, c: VoxelCoord) -> i32 {
        self.water.get(c)
    }

    pub fn vapor(&mut self, c: VoxelCoord) -> i32 {
        self.vapor.get(c)
    }

    pub fn cache_hits(&self) -> u64 {
        self.terrain_id.cache_hits() + self.water.cache_hits() + self.vapor.cache_hits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: i32, y: i32, z: i32) -> VoxelCoord {
        VoxelCoord::new(x, y, z)
    }

    #[test]
    fn never_written_reads_backgrounds() {
        let s = AttributeStore::new();
        let p = c(7, -3, 12);
        assert_eq!(s.get_terrain_id(p), NO_TERRAIN);
        assert!(!s.check_if_terrain_exists(p));
        assert_eq!(s.get_terrain_id_if_exists(p), None);
        assert_eq!(s.entity_type(p), EntityType::default());
        assert_eq!(s.matter_container(p), MatterContainer::default());
        assert_eq!(s.physics_stats(p), PhysicsStats::default());
        assert_eq!(s.get_flags(p), PackedFlags::EMPTY);
        assert_eq!(s.get_max_load_capacity(p), 0);
        assert_eq!(s.get_direction(p), Direction::Up);
        assert_eq!(s.static_attributes(p), StaticAttributes::default());
        assert!(!s.has_any_data(p));
    }

    #[test]
    fn aggregate_setters_round_trip() {
        let mut s = AttributeStore::new();
        let p = c(1, 2, 3);
        s.set_entity_type(p, EntityType::terrain(TerrainKind::Grass));
        s.set_matter_container(
            p,
            MatterContainer {
                terrain: 5,
                water: 10,
                vapor: 2,
                biomass: 1,
            },
        );
        s.set_physics_stats(
            p,
            PhysicsStats {
                mass: 40,
                max_speed: 3,
                min_speed: 1,
            },
        );
        assert_eq!(s.get_main_type(p), EntityKind::Terrain.as_raw());
        assert_eq!(s.get_sub_type0(p), TerrainKind::Grass.as_raw());
        assert_eq!(s.get_water_matter(p), 10);
        assert_eq!(s.get_mass(p), 40);
        assert!(s.has_any_data(p));
    }

    #[test]
    fn structural_integrity_keeps_direction() {
        let mut s = AttributeStore::new();
        let p = c(0, 0, 0);
        s.set_direction(p, Direction::Left);
        s.set_structural_integrity(
            p,
            StructuralIntegrity {
                can_stack_entities: true,
                max_load_capacity: 250,
                matter_state: MatterState::Liquid,
                gradient: GradientVector::new(0.0, 1.0, 0.0),
            },
        );
        assert_eq!(s.get_direction(p), Direction::Left);
        let si = s.structural_integrity(p);
        assert!(si.can_stack_entities);
        assert_eq!(si.max_load_capacity, 250);
        assert_eq!(si.matter_state, MatterState::Liquid);
        assert_eq!(si.gradient.y, 1.0);
    }

    #[test]
    fn delete_terrain_is_idempotent() {
        let mut s = AttributeStore::new();
        let p = c(4, 4, 4);
        s.set_terrain_id(p, STATIC_TERRAIN);
        s.set_water_matter(p, 30);
        s.set_can_stack_entities(p, true);
        assert_eq!(s.delete_terrain(p), STATIC_TERRAIN);
        assert_eq!(s.get_water_matter(p), 0);
        assert!(!s.get_can_stack_entities(p));
        assert!(!s.check_if_terrain_exists(p));
        assert_eq!(s.delete_terrain(p), NO_TERRAIN);
    }

    #[test]
    fn corrupt_ids_still_count_as_existing() {
        let mut s = AttributeStore::new();
        let p = c(0, 0, 1);
        s.set_terrain_id(p, -7);
        assert!(s.check_if_terrain_exists(p));
        assert_eq!(s.get_terrain_id_if_exists(p), Some(-7));
    }

    #[test]
    fn iterate_water_skips_zero() {
        let mut s = AttributeStore::new();
        s.set_water_matter(c(0, 0, 0), 0);
        s.set_water_matter(c(1, 0, 0), 3);
        s.set_water_matter(c(2, 0, 0), 9);
        let mut seen = Vec::new();
        s.iterate_water_matter(|p, v| seen.push((p, v)));
        seen.sort_by_key(|(p, _)| p.x);
        assert_eq!(seen, vec![(c(1, 0, 0), 3), (c(2, 0, 0), 9)]);

        let mut big = 0;
        s.iterate_grid(AttributeField::WaterMatter, 5, |_, _| big += 1);
        assert_eq!(big, 1);
    }

    #[test]
    fn region_queries() {
        let mut s = AttributeStore::new();
        s.set_terrain_id(c(1, 1, 1), STATIC_TERRAIN);
        s.set_terrain_id(c(2, 1, 1), 4);
        s.set_vapor_matter(c(3, 1, 1), 6);
        s.set_terrain_id(c(50, 1, 1), STATIC_TERRAIN);
        let r = Region::new(c(0, 0, 0), c(9, 9, 9));
        let terrain = s.terrain_in_region(&r);
        assert_eq!(terrain, vec![(c(1, 1, 1), -1), (c(2, 1, 1), 4)]);
        let any = s.non_background_in_region(&r);
        assert_eq!(any, vec![c(1, 1, 1), c(2, 1, 1), c(3, 1, 1)]);
    }

    #[test]
    fn apply_static_copies_everything() {
        let mut s = AttributeStore::new();
        let a = c(1, 1, 1);
        let b = c(1, 1, 2);
        s.set_terrain_id(a, STATIC_TERRAIN);
        s.set_entity_type(a, EntityType::terrain(TerrainKind::Water));
        s.set_water_matter(a, 12);
        s.set_mass(a, 7);
        s.set_gradient(a, GradientVector::new(0.5, 0.0, -0.5));
        s.set_max_load_capacity(a, 3);
        let attrs = s.static_attributes(a);
        s.apply_static_attributes(b, &attrs);
        assert_eq!(s.static_attributes(b), attrs);

        s.apply_static_attributes(a, &StaticAttributes::default());
        assert!(!s.has_any_data(a));
    }

    #[test]
    fn store_ids_are_unique() {
        let a = AttributeStore::new();
        let b = AttributeStore::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.accessors().store_id(), a.id());
    }

    #[test]
    fn totals_and_prune() {
        let mut s = AttributeStore::new();
        s.set_water_matter(c(0, 0, 0), 10);
        s.set_water_matter(c(100, 0, 0), 5);
        s.set_vapor_matter(c(0, 0, 0), 2);
        assert_eq!(s.matter_totals().water, 15);
        assert_eq!(s.matter_totals().vapor, 2);
        s.delete_terrain(c(100, 0, 0));
        assert!(s.prune() >= 1);
        assert_eq!(s.matter_totals().water, 10);
        assert!(s.mem_usage() > 0);
        s.clear();
        assert_eq!(s.mem_usage(), 0);
    }

    #[test]
    fn water_tiles_need_terrain() {
        let mut s = AttributeStore::new();
        s.set_main_type(c(0, 0, 0), EntityKind::Terrain.as_raw());
        s.set_sub_type0(c(0, 0, 0), TerrainKind::Water.as_raw());
        assert!(!s.is_water_tile(c(0, 0, 0)));
        s.set_terrain_id(c(0, 0, 0), STATIC_TERRAIN);
        assert!(s.is_water_tile(c(0, 0, 0)));

        s.set_terrain_id(c(1, 0, 0), STATIC_TERRAIN);
        s.set_entity_type(c(1, 0, 0), EntityType::terrain(TerrainKind::Grass));
        assert!(!s.is_water_tile(c(1, 0, 0)));
    }

    #[test]
    fn totals_do_not_overflow_per_voxel_width() {
        let mut s = AttributeStore::new();
        for x in 0..3 {
            s.set_water_matter(c(x, 0, 0), i32::MAX);
        }
        s.set_biomass_matter(c(0, 0, 1), i32::MAX);
        let totals = s.matter_totals();
        assert_eq!(totals.water, 3 * i64::from(i32::MAX));
        assert_eq!(totals.total(), 4 * i64::from(i32::MAX));
    }
}
