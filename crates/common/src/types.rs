use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Facing direction of a voxel. Stored in three bits of the flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum Direction {
    #[default]
    Up = 1,
    Right = 2,
    Down = 3,
    Left = 4,
    Upward = 5,
    Downward = 6,
}

impl Direction {
    /// Decode a raw value. Anything unknown, including 0, decodes as `Up`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            2 => Self::Right,
            3 => Self::Down,
            4 => Self::Left,
            5 => Self::Upward,
            6 => Self::Downward,
            _ => Self::Up,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Physical phase of a voxel's matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum MatterState {
    #[default]
    Solid = 1,
    Liquid = 2,
    Gas = 3,
    Plasma = 4,
}

impl MatterState {
    /// Decode a raw value, clamping into the valid range.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            i32::MIN..=1 => Self::Solid,
            2 => Self::Liquid,
            3 => Self::Gas,
            _ => Self::Plasma,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Main type of a voxel occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EntityKind {
    Terrain = 0,
    Plant = 1,
    Beast = 2,
    TileEffect = 3,
}

impl EntityKind {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Terrain),
            1 => Some(Self::Plant),
            2 => Some(Self::Beast),
            3 => Some(Self::TileEffect),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Terrain sub-type, stored in sub-type-0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TerrainKind {
    Empty = -1,
    Grass = 0,
    Water = 1,
}

impl TerrainKind {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Self::Empty),
            0 => Some(Self::Grass),
            1 => Some(Self::Water),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Type triple of a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityType {
    pub main_type: i32,
    pub sub_type0: i32,
    pub sub_type1: i32,
}

impl EntityType {
    pub fn new(main: EntityKind, sub_type0: i32, sub_type1: i32) -> Self {
        Self {
            main_type: main.as_raw(),
            sub_type0,
            sub_type1,
        }
    }

    /// Static terrain tile of the given kind.
    pub fn terrain(kind: TerrainKind) -> Self {
        Self::new(EntityKind::Terrain, kind.as_raw(), -1)
    }

    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::from_raw(self.main_type)
    }
}

impl Default for EntityType {
    fn default() -> Self {
        Self {
            main_type: 0,
            sub_type0: 0,
            sub_type1: -1,
        }
    }
}

/// Matter amounts held by a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MatterContainer {
    pub terrain: i32,
    pub water: i32,
    pub vapor: i32,
    pub biomass: i32,
}

impl MatterContainer {
    /// Sum of all matter kinds.
    pub fn total(&self) -> i64 {
        self.terrain as i64 + self.water as i64 + self.vapor as i64 + self.biomass as i64
    }
}

/// Matter summed over many voxels. Wide enough for a whole world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MatterTotals {
    pub terrain: i64,
    pub water: i64,
    pub vapor: i64,
    pub biomass: i64,
}

impl MatterTotals {
    pub fn total(&self) -> i64 {
        self.terrain + self.water + self.vapor + self.biomass
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PhysicsStats {
    pub mass: i32,
    pub max_speed: i32,
    pub min_speed: i32,
}

/// Surface gradient, each component in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GradientVector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl GradientVector {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }
}

impl From<Vec3> for GradientVector {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Load-bearing properties of a voxel. Everything except the load capacity
/// lives in the packed flag word.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StructuralIntegrity {
    pub can_stack_entities: bool,
    pub max_load_capacity: i32,
    pub matter_state: MatterState,
    pub gradient: GradientVector,
}

/// Transient velocity of an active voxel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
}

impl Velocity {
    pub const ZERO: Self = Self {
        vx: 0.0,
        vy: 0.0,
        vz: 0.0,
    };

    pub fn new(vx: f32, vy: f32, vz: f32) -> Self {
        Self { vx, vy, vz }
    }

    pub fn as_vec3(&self) -> Vec3 {
        Vec3::new(self.vx, self.vy, self.vz)
    }

    pub fn is_zero(&self) -> bool {
        self.as_vec3() == Vec3::ZERO
    }
}

impl From<Vec3> for Velocity {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}
