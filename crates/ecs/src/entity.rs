use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation-tagged entity handle.
///
/// `index` names a slot; `generation` counts how many times that slot has
/// been freed. A handle whose generation no longer matches its slot is
/// stale and refers to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub index: u32,
    pub generation: u32,
}

impl Entity {
    /// The raw id written into the terrain id grid.
    pub fn raw_id(self) -> i32 {
        self.index as i32
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Slot allocator with per-slot generations and a free list.
#[derive(Debug, Clone, Default)]
pub struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
    live_count: usize,
}

/// Indices stay within `i32` so they fit in the terrain id grid.
const MAX_INDEX: u32 = i32::MAX as u32;

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot, reusing freed ones first. `None` when every
    /// representable index is live.
    pub fn allocate(&mut self) -> Option<Entity> {
        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                let i = self.generations.len() as u32;
                if i > MAX_INDEX {
                    return None;
                }
                self.generations.push(0);
                self.alive.push(false);
                i
            }
        };
        let slot = index as usize;
        self.alive[slot] = true;
        self.live_count += 1;
        Some(Entity {
            index,
            generation: self.generations[slot],
        })
    }

    /// Free the slot if `entity` is live. Bumps the generation so existing
    /// handles go stale.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index as usize;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.alive[slot] = false;
        self.free.push(entity.index);
        self.live_count -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index as usize;
        self.alive.get(slot).copied().unwrap_or(false) && self.generations[slot] == entity.generation
    }

    /// The live handle occupying `index`, if any.
    pub fn resolve(&self, index: u32) -> Option<Entity> {
        let slot = index as usize;
        if self.alive.get(slot).copied().unwrap_or(false) {
            Some(Entity {
                index,
                generation: self.generations[slot],
            })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }
}
