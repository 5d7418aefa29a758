//! Terrain repository: arbitration between static storage and entity overlays.
//!
//! Inactive voxels live only in the [`AttributeStore`]. Active voxels also
//! own an entity carrying transient components (velocity, in-flight move).
//! Static fields are always served from the store; transient fields come
//! from the registry.
//!
//! Locks, always taken in this order:
//! 1. the terrain grid `RwLock` (outer),
//! 2. the tracking `Mutex` (registry plus coordinate/entity maps),
//! 3. the deferred command queue.
//!
//! Mutations go through [`TerrainGridLock`]. Holding one is proof that the
//! grid lock is held, so guard methods never take it again.
//!
//! # Invariants
//! - A voxel is active iff it appears in both tracking maps, and the maps
//!   are inverse to each other.
//! - An active voxel's terrain id is its entity's index.
//! - Entities are never destroyed while any repository lock is held;
//!   destruction is queued and applied by [`TerrainRepository::process_deferred`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use terrarium_common::{
    Direction, EntityKind, EntityType, MatterContainer, MatterState, PhysicsStats,
    StructuralIntegrity, Velocity, VoxelCoord,
};
use terrarium_ecs::{ComponentEvent, EcsError, Entity, MovingComponent, Position, Registry};
use terrarium_store::{AttributeStore, NO_TERRAIN, STATIC_TERRAIN, StaticAttributes};

#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error(
        "cannot move terrain {from} -> {to}: source id {from_id}, destination id {to_id}"
    )]
    MoveContract {
        from: VoxelCoord,
        to: VoxelCoord,
        from_id: i32,
        to_id: i32,
    },
    #[error("entity {0} is not tracked by the repository")]
    InvalidEntity(Entity),
    #[error("entity {0} has no position")]
    MissingPosition(Entity),
    #[error("corrupt terrain id {id} at {coord}")]
    CorruptTerrainId { coord: VoxelCoord, id: i32 },
    #[error("terrain id {0} cannot be written directly")]
    ReservedTerrainId(i32),
    #[error(transparent)]
    Ecs(#[from] EcsError),
}

/// Requests queued while locks are held and applied after they are released.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RepositoryEvent {
    DestroyEntity { entity: Entity },
    RemoveVelocity { entity: Entity },
    RemoveMovingComponent { entity: Entity },
    /// A terrain id below `-2` was read. Reported, never acted on.
    CorruptTerrainId { coord: VoxelCoord, id: i32 },
}

/// Everything known about one voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainInfo {
    pub coord: VoxelCoord,
    pub terrain_id: Option<i32>,
    pub entity_type: EntityType,
    pub matter: MatterContainer,
    pub physics: PhysicsStats,
    pub structural: StructuralIntegrity,
    pub direction: Direction,
    pub transient: Option<TransientInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientInfo {
    pub entity: Entity,
    pub velocity: Option<Velocity>,
    pub moving: Option<MovingComponent>,
}

/// Outcome of [`TerrainRepository::tick_transients`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransientTick {
    /// Moves whose timer ran out and were applied to the grid.
    pub completed_moves: Vec<Entity>,
    /// Moves whose timer ran out but whose destination was occupied.
    pub blocked_moves: Vec<Entity>,
    pub expired_timers: Vec<Entity>,
}

#[derive(Debug, Default)]
struct Tracking {
    registry: Registry,
    by_coord: HashMap<VoxelCoord, Entity>,
    by_entity: HashMap<Entity, VoxelCoord>,
}

impl Tracking {
    fn track(&mut self, coord: VoxelCoord, entity: Entity) {
        self.by_coord.insert(coord, entity);
        self.by_entity.insert(entity, coord);
    }

    fn untrack_coord(&mut self, coord: VoxelCoord) -> Option<Entity> {
        let entity = self.by_coord.remove(&coord)?;
        self.by_entity.remove(&entity);
        Some(entity)
    }
}

#[derive(Debug, Default)]
pub struct TerrainRepository {
    grid: RwLock<AttributeStore>,
    tracking: Mutex<Tracking>,
    deferred: Mutex<Vec<RepositoryEvent>>,
}

impl TerrainRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing store. Any entity ids in it are demoted to `-1`,
    /// since no entity backs them yet.
    pub fn with_store(mut store: AttributeStore) -> Self {
        let mut stale = Vec::new();
        store.iterate_grid(terrarium_store::AttributeField::TerrainId, 0, |c, _| {
            stale.push(c)
        });
        for c in stale {
            store.set_terrain_id(c, STATIC_TERRAIN);
        }
        Self {
            grid: RwLock::new(store),
            ..Self::default()
        }
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("tracking lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn defer(&self, event: RepositoryEvent) {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Acquire the terrain grid exclusively. Dropping the guard unlocks.
    pub fn lock_terrain_grid(&self) -> TerrainGridLock<'_> {
        let store = self.grid.write().unwrap_or_else(|poisoned| {
            tracing::warn!("terrain grid lock poisoned; recovering");
            poisoned.into_inner()
        });
        TerrainGridLock { repo: self, store }
    }

    /// Acquire the terrain grid shared.
    pub fn read_terrain_grid(&self) -> TerrainGridRead<'_> {
        let store = self.grid.read().unwrap_or_else(|poisoned| {
            tracing::warn!("terrain grid lock poisoned; recovering");
            poisoned.into_inner()
        });
        TerrainGridRead { repo: self, store }
    }

    // --- Static reads ---

    /// `None` if the voxel was never marked as terrain, otherwise the stored
    /// id. Ids below `-2` are reported and returned as an error.
    pub fn get_terrain_id_if_exists(&self, c: VoxelCoord) -> Result<Option<i32>, TerrainError> {
        self.read_terrain_grid().terrain_id_checked(c)
    }

    pub fn check_if_terrain_exists(&self, c: VoxelCoord) -> bool {
        self.read_terrain_grid().check_if_terrain_exists(c)
    }

    pub fn get_terrain_entity_type(&self, c: VoxelCoord) -> EntityType {
        self.read_terrain_grid().entity_type(c)
    }

    pub fn get_terrain_matter_container(&self, c: VoxelCoord) -> MatterContainer {
        self.read_terrain_grid().matter_container(c)
    }

    pub fn get_physics_stats(&self, c: VoxelCoord) -> PhysicsStats {
        self.read_terrain_grid().physics_stats(c)
    }

    pub fn get_terrain_structural_integrity(&self, c: VoxelCoord) -> StructuralIntegrity {
        self.read_terrain_grid().structural_integrity(c)
    }

    pub fn get_terrain_direction(&self, c: VoxelCoord) -> Direction {
        self.read_terrain_grid().get_direction(c)
    }

    // --- Static writes ---

    pub fn set_terrain_entity_type(&self, c: VoxelCoord, t: EntityType) {
        self.lock_terrain_grid().set_entity_type(c, t);
    }

    pub fn set_terrain_matter_container(&self, c: VoxelCoord, m: MatterContainer) {
        self.lock_terrain_grid().set_matter_container(c, m);
    }

    pub fn set_physics_stats(&self, c: VoxelCoord, p: PhysicsStats) {
        self.lock_terrain_grid().set_physics_stats(c, p);
    }

    pub fn set_terrain_structural_integrity(&self, c: VoxelCoord, s: StructuralIntegrity) {
        self.lock_terrain_grid().set_structural_integrity(c, s);
    }

    pub fn set_terrain_direction(&self, c: VoxelCoord, d: Direction) {
        self.lock_terrain_grid().set_direction(c, d);
    }

    /// Mark `c` as static terrain of type `t` if it holds none yet.
    pub fn mark_terrain(&self, c: VoxelCoord, t: EntityType) -> bool {
        self.lock_terrain_grid().mark_terrain(c, t)
    }

    // --- Transient ---

    /// Zero for inactive voxels. Never activates.
    pub fn get_velocity(&self, c: VoxelCoord) -> Velocity {
        let t = self.tracking();
        t.by_coord
            .get(&c)
            .and_then(|e| t.registry.get_velocity(*e))
            .unwrap_or(Velocity::ZERO)
    }

    /// Activates the voxel on first write.
    pub fn set_velocity(&self, c: VoxelCoord, v: Velocity) -> Result<Entity, TerrainError> {
        self.lock_terrain_grid().set_velocity(c, v)
    }

    pub fn get_moving_component(&self, c: VoxelCoord) -> Option<MovingComponent> {
        let t = self.tracking();
        t.by_coord.get(&c).and_then(|e| t.registry.get_moving(*e))
    }

    pub fn has_moving_component(&self, c: VoxelCoord) -> bool {
        self.get_moving_component(c).is_some()
    }

    /// Activates the voxel on first write.
    pub fn set_moving_component(
        &self,
        c: VoxelCoord,
        m: MovingComponent,
    ) -> Result<Entity, TerrainError> {
        self.lock_terrain_grid().set_moving_component(c, m)
    }

    /// Detach velocity; demotes the voxel if nothing transient remains.
    pub fn remove_velocity(&self, entity: Entity) -> Result<bool, TerrainError> {
        self.lock_terrain_grid().remove_velocity(entity)
    }

    /// Detach the move descriptor; demotes the voxel if nothing transient remains.
    pub fn remove_moving_component(&self, entity: Entity) -> Result<bool, TerrainError> {
        self.lock_terrain_grid().remove_moving_component(entity)
    }

    // --- Lifecycle ---

    pub fn move_terrain(&self, m: &MovingComponent) -> Result<(), TerrainError> {
        self.lock_terrain_grid().move_terrain(m)
    }

    pub fn delete_terrain(&self, c: VoxelCoord) -> i32 {
        self.lock_terrain_grid().delete_terrain(c)
    }

    pub fn is_active(&self, c: VoxelCoord) -> bool {
        self.tracking().by_coord.contains_key(&c)
    }

    pub fn get_entity_at(&self, c: VoxelCoord) -> Option<Entity> {
        self.tracking().by_coord.get(&c).copied()
    }

    pub fn get_position_of_entity(&self, entity: Entity) -> Result<VoxelCoord, TerrainError> {
        let t = self.tracking();
        if !t.registry.is_alive(entity) {
            return Err(TerrainError::InvalidEntity(entity));
        }
        t.by_entity
            .get(&entity)
            .copied()
            .ok_or(TerrainError::MissingPosition(entity))
    }

    /// Whether the terrain id at `c` names a live entity.
    pub fn check_if_terrain_has_entity(&self, c: VoxelCoord) -> bool {
        let id = self.read_terrain_grid().get_terrain_id(c);
        id >= 0 && self.tracking().registry.resolve(id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.tracking().by_coord.len()
    }

    pub fn read_terrain_info(&self, c: VoxelCoord) -> TerrainInfo {
        self.read_terrain_grid().terrain_info(c)
    }

    /// Advance in-flight moves and timers by `dt` ticks.
    ///
    /// A move whose time runs out is applied with [`TerrainGridLock::move_terrain`]
    /// and its moving component is queued for removal.
    pub fn tick_transients(&self, dt: i32) -> TransientTick {
        let _span = tracing::debug_span!("tick_transients", dt).entered();
        let mut out = TransientTick::default();
        let mut grid = self.lock_terrain_grid();

        let due = {
            let mut t = self.tracking();
            let moves: Vec<(Entity, MovingComponent)> = t
                .registry
                .moving()
                .iter()
                .map(|(e, m)| (*e, *m))
                .collect();
            let mut due = Vec::new();
            for (entity, mut m) in moves {
                if !m.is_moving {
                    continue;
                }
                m.time_remaining -= dt;
                if m.time_remaining <= 0 {
                    // Settled once; the component lingers until deferred removal.
                    m.time_remaining = 0;
                    m.is_moving = false;
                    due.push((entity, m));
                }
                if let Err(e) = t.registry.set_moving(entity, m) {
                    tracing::warn!(%entity, error = %e, "failed to advance move");
                }
            }
            out.expired_timers = t.registry.tick_timers();
            due
        };

        for (entity, m) in due {
            match grid.move_terrain(&m) {
                Ok(()) => out.completed_moves.push(entity),
                Err(e) => {
                    tracing::debug!(%entity, error = %e, "move blocked");
                    out.blocked_moves.push(entity);
                }
            }
            self.defer(RepositoryEvent::RemoveMovingComponent { entity });
        }
        out
    }

    // --- Events ---

    /// Apply queued destroy and remove requests. Must be called with no
    /// repository lock held. Returns corruption reports for the caller.
    pub fn process_deferred(&self) -> Vec<RepositoryEvent> {
        let mut reports = Vec::new();
        loop {
            let batch = std::mem::take(
                &mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if batch.is_empty() {
                break;
            }
            for event in batch {
                match event {
                    RepositoryEvent::DestroyEntity { entity } => {
                        let mut t = self.tracking();
                        if t.by_entity.contains_key(&entity) {
                            tracing::warn!(%entity, "destroy requested for tracked entity; skipped");
                            continue;
                        }
                        if t.registry.is_alive(entity) {
                            if let Err(e) = t.registry.destroy(entity) {
                                tracing::warn!(%entity, error = %e, "deferred destroy failed");
                            }
                        }
                    }
                    RepositoryEvent::RemoveVelocity { entity } => {
                        if let Err(e) = self.remove_velocity(entity) {
                            tracing::debug!(%entity, error = %e, "deferred velocity removal skipped");
                        }
                    }
                    RepositoryEvent::RemoveMovingComponent { entity } => {
                        if let Err(e) = self.remove_moving_component(entity) {
                            tracing::debug!(%entity, error = %e, "deferred move removal skipped");
                        }
                    }
                    report @ RepositoryEvent::CorruptTerrainId { .. } => reports.push(report),
                }
            }
        }
        reports
    }

    /// Queue a request to apply later with [`Self::process_deferred`].
    pub fn request(&self, event: RepositoryEvent) {
        self.defer(event);
    }

    pub fn pending_requests(&self) -> usize {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drain and return registry component events.
    pub fn drain_component_events(&self) -> Vec<ComponentEvent> {
        self.tracking().registry.drain_events()
    }

    pub fn live_entities(&self) -> usize {
        self.tracking().registry.len()
    }
}

/// Shared access to the terrain grid.
pub struct TerrainGridRead<'a> {
    repo: &'a TerrainRepository,
    store: RwLockReadGuard<'a, AttributeStore>,
}

impl Deref for TerrainGridRead<'_> {
    type Target = AttributeStore;

    fn deref(&self) -> &AttributeStore {
        &self.store
    }
}

impl TerrainGridRead<'_> {
    pub fn store(&self) -> &AttributeStore {
        &self.store
    }

    pub fn terrain_id_checked(&self, c: VoxelCoord) -> Result<Option<i32>, TerrainError> {
        checked_terrain_id(self.repo, &self.store, c)
    }

    pub fn terrain_info(&self, c: VoxelCoord) -> TerrainInfo {
        terrain_info(self.repo, &self.store, c)
    }
}

/// Exclusive access to the terrain grid. Dropping it releases the lock.
pub struct TerrainGridLock<'a> {
    repo: &'a TerrainRepository,
    store: RwLockWriteGuard<'a, AttributeStore>,
}

impl Deref for TerrainGridLock<'_> {
    type Target = AttributeStore;

    fn deref(&self) -> &AttributeStore {
        &self.store
    }
}

impl TerrainGridLock<'_> {
    /// Release the lock early.
    pub fn unlock(self) {}

    pub fn terrain_id_checked(&self, c: VoxelCoord) -> Result<Option<i32>, TerrainError> {
        checked_terrain_id(self.repo, &self.store, c)
    }

    pub fn terrain_info(&self, c: VoxelCoord) -> TerrainInfo {
        terrain_info(self.repo, &self.store, c)
    }

    // --- Static writes ---

    pub fn set_entity_type(&mut self, c: VoxelCoord, t: EntityType) {
        self.store.set_entity_type(c, t);
    }

    pub fn set_matter_container(&mut self, c: VoxelCoord, m: MatterContainer) {
        self.store.set_matter_container(c, m);
    }

    pub fn set_terrain_matter(&mut self, c: VoxelCoord, v: i32) {
        self.store.set_terrain_matter(c, v);
    }

    pub fn set_water_matter(&mut self, c: VoxelCoord, v: i32) {
        self.store.set_water_matter(c, v);
    }

    pub fn set_vapor_matter(&mut self, c: VoxelCoord, v: i32) {
        self.store.set_vapor_matter(c, v);
    }

    pub fn set_biomass_matter(&mut self, c: VoxelCoord, v: i32) {
        self.store.set_biomass_matter(c, v);
    }

    pub fn set_physics_stats(&mut self, c: VoxelCoord, p: PhysicsStats) {
        self.store.set_physics_stats(c, p);
    }

    pub fn set_structural_integrity(&mut self, c: VoxelCoord, s: StructuralIntegrity) {
        self.store.set_structural_integrity(c, s);
    }

    pub fn set_direction(&mut self, c: VoxelCoord, d: Direction) {
        self.store.set_direction(c, d);
    }

    pub fn set_matter_state(&mut self, c: VoxelCoord, s: MatterState) {
        self.store.set_matter_state(c, s);
    }

    /// Mark `c` as static terrain of type `t`. No-op returning `false` if
    /// terrain already exists there.
    pub fn mark_terrain(&mut self, c: VoxelCoord, t: EntityType) -> bool {
        if self.store.check_if_terrain_exists(c) {
            return false;
        }
        self.store.set_terrain_id(c, STATIC_TERRAIN);
        self.store.set_entity_type(c, t);
        true
    }

    /// Overwrite every static field of `c`. An active voxel is deactivated
    /// first; entity ids in `attrs` are written as `-1`.
    pub fn write_static_attributes(&mut self, c: VoxelCoord, attrs: &StaticAttributes) {
        if let Some(entity) = self.repo.tracking().untrack_coord(c) {
            self.repo.defer(RepositoryEvent::DestroyEntity { entity });
        }
        let mut attrs = *attrs;
        if attrs.terrain_id >= 0 {
            attrs.terrain_id = STATIC_TERRAIN;
        }
        self.store.apply_static_attributes(c, &attrs);
    }

    // --- Transient ---

    pub fn get_velocity(&self, c: VoxelCoord) -> Velocity {
        let t = self.repo.tracking();
        t.by_coord
            .get(&c)
            .and_then(|e| t.registry.get_velocity(*e))
            .unwrap_or(Velocity::ZERO)
    }

    pub fn get_moving_component(&self, c: VoxelCoord) -> Option<MovingComponent> {
        let t = self.repo.tracking();
        t.by_coord.get(&c).and_then(|e| t.registry.get_moving(*e))
    }

    pub fn is_active(&self, c: VoxelCoord) -> bool {
        self.repo.tracking().by_coord.contains_key(&c)
    }

    pub fn set_velocity(&mut self, c: VoxelCoord, v: Velocity) -> Result<Entity, TerrainError> {
        let repo = self.repo;
        let mut t = repo.tracking();
        let entity = self.ensure_active(&mut t, c)?;
        t.registry.set_velocity(entity, v)?;
        Ok(entity)
    }

    pub fn set_moving_component(
        &mut self,
        c: VoxelCoord,
        m: MovingComponent,
    ) -> Result<Entity, TerrainError> {
        let repo = self.repo;
        let mut t = repo.tracking();
        let entity = self.ensure_active(&mut t, c)?;
        t.registry.set_moving(entity, m)?;
        Ok(entity)
    }

    pub fn remove_velocity(&mut self, entity: Entity) -> Result<bool, TerrainError> {
        let repo = self.repo;
        let mut t = repo.tracking();
        if !t.registry.is_alive(entity) {
            return Err(TerrainError::InvalidEntity(entity));
        }
        t.registry.remove_velocity(entity)?;
        Ok(self.demote_if_idle(&mut t, entity))
    }

    pub fn remove_moving_component(&mut self, entity: Entity) -> Result<bool, TerrainError> {
        let repo = self.repo;
        let mut t = repo.tracking();
        if !t.registry.is_alive(entity) {
            return Err(TerrainError::InvalidEntity(entity));
        }
        t.registry.remove_moving(entity)?;
        Ok(self.demote_if_idle(&mut t, entity))
    }

    /// Attach hook: the entity for `c`, creating and tracking one if the
    /// voxel is inactive.
    fn ensure_active(&mut self, t: &mut Tracking, c: VoxelCoord) -> Result<Entity, TerrainError> {
        if let Some(entity) = t.by_coord.get(&c) {
            return Ok(*entity);
        }
        let current = self.store.get_terrain_id(c);
        if current < NO_TERRAIN {
            self.repo
                .defer(RepositoryEvent::CorruptTerrainId { coord: c, id: current });
            return Err(TerrainError::CorruptTerrainId { coord: c, id: current });
        }
        if current >= 0 {
            tracing::warn!(%c, id = current, "untracked entity id in terrain grid; replacing");
        }

        let entity = t.registry.create()?;
        t.registry.set_position(
            entity,
            Position {
                coord: c,
                direction: self.store.get_direction(c),
            },
        )?;
        t.track(c, entity);
        self.store.set_terrain_id(c, entity.raw_id());
        tracing::debug!(%c, %entity, "voxel activated");
        Ok(entity)
    }

    /// Detach hook: deactivate when no transient component remains, unless
    /// the voxel hosts an ongoing tile effect.
    fn demote_if_idle(&mut self, t: &mut Tracking, entity: Entity) -> bool {
        if t.registry.has_velocity(entity) || t.registry.has_moving(entity) {
            return false;
        }
        let Some(coord) = t.by_entity.get(&entity).copied() else {
            return false;
        };
        if self.store.get_main_type(coord) == EntityKind::TileEffect.as_raw() {
            return false;
        }
        t.untrack_coord(coord);
        if self.store.get_terrain_id(coord) == entity.raw_id() {
            self.store.set_terrain_id(coord, STATIC_TERRAIN);
        }
        self.repo.defer(RepositoryEvent::DestroyEntity { entity });
        tracing::debug!(%coord, %entity, "voxel deactivated");
        true
    }

    // --- Lifecycle ---

    /// Relocate a whole voxel from `m.moving_from` to `m.moving_to`.
    ///
    /// The source must hold terrain and the destination must hold none;
    /// otherwise nothing changes. The destination id is written before any
    /// other field is copied, and the source is left fully cleared.
    pub fn move_terrain(&mut self, m: &MovingComponent) -> Result<(), TerrainError> {
        let from = m.moving_from;
        let to = m.moving_to;
        let from_id = self.store.get_terrain_id(from);
        let to_id = self.store.get_terrain_id(to);
        if from_id < NO_TERRAIN {
            self.repo
                .defer(RepositoryEvent::CorruptTerrainId { coord: from, id: from_id });
            return Err(TerrainError::CorruptTerrainId { coord: from, id: from_id });
        }
        if from_id == NO_TERRAIN || to_id != NO_TERRAIN {
            return Err(TerrainError::MoveContract {
                from,
                to,
                from_id,
                to_id,
            });
        }

        let repo = self.repo;
        let mut t = repo.tracking();
        let owner = t.untrack_coord(from);
        let dest_id = match owner {
            Some(entity) => entity.raw_id(),
            None if from_id >= 0 => {
                tracing::warn!(%from, id = from_id, "moving untracked entity id; demoting");
                STATIC_TERRAIN
            }
            None => from_id,
        };

        // Reserve the destination before copying anything else.
        self.store.set_terrain_id(to, dest_id);
        let mut attrs = self.store.static_attributes(from);
        attrs.terrain_id = dest_id;
        self.store.apply_static_attributes(to, &attrs);
        self.store.delete_terrain(from);

        if let Some(entity) = owner {
            t.track(to, entity);
            let direction = t
                .registry
                .get_position(entity)
                .map(|p| p.direction)
                .unwrap_or_default();
            t.registry.set_position(
                entity,
                Position {
                    coord: to,
                    direction,
                },
            )?;
        }
        tracing::debug!(%from, %to, id = dest_id, "terrain moved");
        Ok(())
    }

    /// Clear `c` from static storage. Returns the id stored before the
    /// call (`-2` if none). A tracked entity at `c` is untracked and its
    /// destruction queued.
    pub fn delete_terrain(&mut self, c: VoxelCoord) -> i32 {
        let previous = self.store.delete_terrain(c);
        if let Some(entity) = self.repo.tracking().untrack_coord(c) {
            self.repo.defer(RepositoryEvent::DestroyEntity { entity });
        }
        previous
    }
}

fn checked_terrain_id(
    repo: &TerrainRepository,
    store: &AttributeStore,
    c: VoxelCoord,
) -> Result<Option<i32>, TerrainError> {
    match store.get_terrain_id_if_exists(c) {
        Some(id) if id < NO_TERRAIN => {
            tracing::warn!(%c, id, "corrupt terrain id");
            repo.defer(RepositoryEvent::CorruptTerrainId { coord: c, id });
            Err(TerrainError::CorruptTerrainId { coord: c, id })
        }
        other => Ok(other),
    }
}

fn terrain_info(repo: &TerrainRepository, store: &AttributeStore, c: VoxelCoord) -> TerrainInfo {
    let transient = {
        let t = repo.tracking();
        t.by_coord.get(&c).map(|&entity| TransientInfo {
            entity,
            velocity: t.registry.get_velocity(entity),
            moving: t.registry.get_moving(entity),
        })
    };
    TerrainInfo {
        coord: c,
        terrain_id: store.get_terrain_id_if_exists(c),
        entity_type: store.entity_type(c),
        matter: store.matter_container(c),
        physics: store.physics_stats(c),
        structural: store.structural_integrity(c),
        direction: store.get_direction(c),
        transient,
    }
}
