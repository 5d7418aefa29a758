//! Transient voxel components on generation-tagged entities.
//!
//! Only active voxels have an entity here. Static terrain data never lives
//! in this crate; it stays in the attribute store.
//!
//! # Invariants
//! - All component mutations produce events.
//! - Iteration order is deterministic (BTreeMap keyed by entity).
//! - Every operation on a stale handle fails with [`EcsError::StaleEntity`]
//!   and changes nothing.
//! - Destroying an entity removes all of its components first.

pub mod entity;

pub use entity::{Entity, EntityAllocator};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use terrarium_common::{Direction, Velocity, VoxelCoord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    #[error("stale or destroyed entity {0}")]
    StaleEntity(Entity),
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },
    #[error("entity index space exhausted")]
    Exhausted,
}

/// Where an active voxel sits and which way it faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub coord: VoxelCoord,
    pub direction: Direction,
}

/// In-flight move of a voxel from one coordinate to a neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovingComponent {
    pub is_moving: bool,
    pub moving_from: VoxelCoord,
    pub moving_to: VoxelCoord,
    /// Velocity at the time the move started.
    pub velocity: Velocity,
    pub will_stop_x: bool,
    pub will_stop_y: bool,
    pub will_stop_z: bool,
    pub completion_time: i32,
    pub time_remaining: i32,
    pub direction: Direction,
}

impl MovingComponent {
    /// A move from `from` to `to` finishing after `completion_time` ticks.
    pub fn between(from: VoxelCoord, to: VoxelCoord, completion_time: i32) -> Self {
        Self {
            is_moving: true,
            moving_from: from,
            moving_to: to,
            velocity: Velocity::ZERO,
            will_stop_x: false,
            will_stop_y: false,
            will_stop_z: false,
            completion_time,
            time_remaining: completion_time,
            direction: Direction::default(),
        }
    }
}

/// Countdown attached to short-lived entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub ticks_remaining: u32,
}

/// Events produced by entity and component mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentEvent {
    Created { entity: Entity },
    Destroyed { entity: Entity },
    PositionAdded { entity: Entity, position: Position },
    PositionUpdated { entity: Entity, old: Position, new: Position },
    PositionRemoved { entity: Entity, position: Position },
    VelocityAdded { entity: Entity, velocity: Velocity },
    VelocityUpdated { entity: Entity, old: Velocity, new: Velocity },
    VelocityRemoved { entity: Entity, velocity: Velocity },
    MovingAdded { entity: Entity, moving: MovingComponent },
    MovingUpdated { entity: Entity, moving: MovingComponent },
    MovingRemoved { entity: Entity, moving: MovingComponent },
    TimerAdded { entity: Entity, timer: Timer },
    TimerRemoved { entity: Entity, timer: Timer },
}

/// Entity arena plus deterministic component storage.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: EntityAllocator,
    positions: BTreeMap<Entity, Position>,
    velocities: BTreeMap<Entity, Velocity>,
    moving: BTreeMap<Entity, MovingComponent>,
    timers: BTreeMap<Entity, Timer>,
    events: Vec<ComponentEvent>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return all pending component events.
    pub fn drain_events(&mut self) -> Vec<ComponentEvent> {
        std::mem::take(&mut self.events)
    }

    /// Read-only access to pending events.
    pub fn events(&self) -> &[ComponentEvent] {
        &self.events
    }

    fn check(&self, entity: Entity) -> Result<(), EcsError> {
        if self.entities.is_alive(entity) {
            Ok(())
        } else {
            Err(EcsError::StaleEntity(entity))
        }
    }

    // --- Entities ---
    pub fn create(&mut self) -> Result<Entity, EcsError> {
        let entity = self.entities.allocate().ok_or(EcsError::Exhausted)?;
        self.events.push(ComponentEvent::Created { entity });
        tracing::trace!(%entity, "entity created");
        Ok(entity)
    }

    /// Remove every component, then free the slot.
    pub fn destroy(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.check(entity)?;
        self.remove_timer(entity)?;
        self.remove_moving(entity)?;
        self.remove_velocity(entity)?;
        self.remove_position(entity)?;
        self.entities.free(entity);
        self.events.push(ComponentEvent::Destroyed { entity });
        tracing::trace!(%entity, "entity destroyed");
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Resolve a raw id (as stored in the terrain grid) to its live handle.
    pub fn resolve(&self, raw_id: i32) -> Option<Entity> {
        u32::try_from(raw_id)
            .ok()
            .and_then(|i| self.entities.resolve(i))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // --- Position ---
    pub fn set_position(&mut self, entity: Entity, position: Position) -> Result<(), EcsError> {
        self.check(entity)?;
        match self.positions.insert(entity, position) {
            Some(old) => self.events.push(ComponentEvent::PositionUpdated {
                entity,
                old,
                new: position,
            }),
            None => self
                .events
                .push(ComponentEvent::PositionAdded { entity, position }),
        }
        Ok(())
    }

    pub fn get_position(&self, entity: Entity) -> Option<Position> {
        self.positions.get(&entity).copied()
    }

    pub fn remove_position(&mut self, entity: Entity) -> Result<Option<Position>, EcsError> {
        self.check(entity)?;
        let removed = self.positions.remove(&entity);
        if let Some(position) = removed {
            self.events
                .push(ComponentEvent::PositionRemoved { entity, position });
        }
        Ok(removed)
    }

    // --- Velocity ---
    pub fn set_velocity(&mut self, entity: Entity, velocity: Velocity) -> Result<(), EcsError> {
        self.check(entity)?;
        match self.velocities.insert(entity, velocity) {
            Some(old) => self.events.push(ComponentEvent::VelocityUpdated {
                entity,
                old,
                new: velocity,
            }),
            None => self
                .events
                .push(ComponentEvent::VelocityAdded { entity, velocity }),
        }
        Ok(())
    }

    pub fn get_velocity(&self, entity: Entity) -> Option<Velocity> {
        self.velocities.get(&entity).copied()
    }

    pub fn has_velocity(&self, entity: Entity) -> bool {
        self.velocities.contains_key(&entity)
    }

    pub fn remove_velocity(&mut self, entity: Entity) -> Result<Option<Velocity>, EcsError> {
        self.check(entity)?;
        let removed = self.velocities.remove(&entity);
        if let Some(velocity) = removed {
            self.events
                .push(ComponentEvent::VelocityRemoved { entity, velocity });
        }
        Ok(removed)
    }

    // --- Moving ---
    pub fn set_moving(&mut self, entity: Entity, moving: MovingComponent) -> Result<(), EcsError> {
        self.check(entity)?;
        match self.moving.insert(entity, moving) {
            Some(_) => self
                .events
                .push(ComponentEvent::MovingUpdated { entity, moving }),
            None => self
                .events
                .push(ComponentEvent::MovingAdded { entity, moving }),
        }
        Ok(())
    }

    pub fn get_moving(&self, entity: Entity) -> Option<MovingComponent> {
        self.moving.get(&entity).copied()
    }

    pub fn has_moving(&self, entity: Entity) -> bool {
        self.moving.contains_key(&entity)
    }

    pub fn remove_moving(&mut self, entity: Entity) -> Result<Option<MovingComponent>, EcsError> {
        self.check(entity)?;
        let removed = self.moving.remove(&entity);
        if let Some(moving) = removed {
            self.events
                .push(ComponentEvent::MovingRemoved { entity, moving });
        }
        Ok(removed)
    }

    pub fn moving(&self) -> &BTreeMap<Entity, MovingComponent> {
        &self.moving
    }

    // --- Timer ---
    pub fn set_timer(&mut self, entity: Entity, timer: Timer) -> Result<(), EcsError> {
        self.check(entity)?;
        if self.timers.insert(entity, timer).is_none() {
            self.events.push(ComponentEvent::TimerAdded { entity, timer });
        }
        Ok(())
    }

    pub fn get_timer(&self, entity: Entity) -> Option<Timer> {
        self.timers.get(&entity).copied()
    }

    pub fn remove_timer(&mut self, entity: Entity) -> Result<Option<Timer>, EcsError> {
        self.check(entity)?;
        let removed = self.timers.remove(&entity);
        if let Some(timer) = removed {
            self.events.push(ComponentEvent::TimerRemoved { entity, timer });
        }
        Ok(removed)
    }

    /// Decrement every timer by one tick. Returns the entities whose timer
    /// ran out; their timer component has already been removed.
    pub fn tick_timers(&mut self) -> Vec<Entity> {
        let mut expired = Vec::new();
        for (entity, timer) in self.timers.iter_mut() {
            timer.ticks_remaining = timer.ticks_remaining.saturating_sub(1);
            if timer.ticks_remaining == 0 {
                expired.push(*entity);
            }
        }
        for entity in &expired {
            if let Some(timer) = self.timers.remove(entity) {
                self.events.push(ComponentEvent::TimerRemoved {
                    entity: *entity,
                    timer,
                });
            }
        }
        expired
    }
}

pub fn crate_info() -> &'static str {
    "terrarium-ecs v0.1.0"
}
