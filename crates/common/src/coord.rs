use glam::IVec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer voxel coordinate. The key of every grid and tracking map.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct VoxelCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The voxel directly below (z - 1).
    pub const fn below(self) -> Self {
        Self::new(self.x, self.y, self.z - 1)
    }

    /// The voxel directly above (z + 1).
    pub const fn above(self) -> Self {
        Self::new(self.x, self.y, self.z + 1)
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl From<IVec3> for VoxelCoord {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<VoxelCoord> for IVec3 {
    fn from(c: VoxelCoord) -> Self {
        IVec3::new(c.x, c.y, c.z)
    }
}

impl From<(i32, i32, i32)> for VoxelCoord {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for VoxelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Inclusive axis-aligned box of voxels.
///
/// Used for simulation boxes, region queries and snapshots. A region whose
/// `max` is below its `min` on any axis is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub min: VoxelCoord,
    pub max: VoxelCoord,
}

impl Region {
    pub const fn new(min: VoxelCoord, max: VoxelCoord) -> Self {
        Self { min, max }
    }

    /// Region covering `[0, width) x [0, height) x [0, depth)`.
    pub fn from_dims(width: i32, height: i32, depth: i32) -> Self {
        Self::new(
            VoxelCoord::new(0, 0, 0),
            VoxelCoord::new(width - 1, height - 1, depth - 1),
        )
    }

    pub fn contains(&self, c: VoxelCoord) -> bool {
        c.x >= self.min.x
            && c.x <= self.max.x
            && c.y >= self.min.y
            && c.y <= self.max.y
            && c.z >= self.min.z
            && c.z <= self.max.z
    }

    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }

    /// Number of voxels in the region.
    pub fn volume(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let dx = (self.max.x - self.min.x) as u64 + 1;
        let dy = (self.max.y - self.min.y) as u64 + 1;
        let dz = (self.max.z - self.min.z) as u64 + 1;
        dx * dy * dz
    }

    /// Overlap of two regions, or `None` if they are disjoint.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let r = Region::new(
            VoxelCoord::new(
                self.min.x.max(other.min.x),
                self.min.y.max(other.min.y),
                self.min.z.max(other.min.z),
            ),
            VoxelCoord::new(
                self.max.x.min(other.max.x),
                self.max.y.min(other.max.y),
                self.max.z.min(other.max.z),
            ),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Iterate every coordinate, Z outermost, X innermost.
    pub fn iter(&self) -> RegionIter {
        RegionIter {
            region: *self,
            next: (!self.is_empty()).then_some(self.min),
        }
    }
}

impl IntoIterator for Region {
    type Item = VoxelCoord;
    type IntoIter = RegionIter;

    fn into_iter(self) -> RegionIter {
        self.iter()
    }
}

/// Iterator over the coordinates of a [`Region`].
#[derive(Debug, Clone)]
pub struct RegionIter {
    region: Region,
    next: Option<VoxelCoord>,
}

impl Iterator for RegionIter {
    type Item = VoxelCoord;

    fn next(&mut self) -> Option<VoxelCoord> {
        let cur = self.next?;
        let r = &self.region;
        let mut n = cur;
        n.x += 1;
        if n.x > r.max.x {
            n.x = r.min.x;
            n.y += 1;
            if n.y > r.max.y {
                n.y = r.min.y;
                n.z += 1;
            }
        }
        self.next = (n.z <= r.max.z).then_some(n);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ivec3_conversion() {
        let c = VoxelCoord::new(1, -2, 3);
        let v: IVec3 = c.into();
        assert_eq!(v, IVec3::new(1, -2, 3));
        assert_eq!(VoxelCoord::from(v), c);
    }

    #[test]
    fn region_iterates_z_outermost() {
        let r = Region::new(VoxelCoord::new(0, 0, 0), VoxelCoord::new(1, 1, 1));
        let coords: Vec<_> = r.iter().collect();
        assert_eq!(coords.len(), 8);
        assert_eq!(coords[0], VoxelCoord::new(0, 0, 0));
        assert_eq!(coords[1], VoxelCoord::new(1, 0, 0));
        assert_eq!(coords[2], VoxelCoord::new(0, 1, 0));
        assert_eq!(coords[4], VoxelCoord::new(0, 0, 1));
        assert_eq!(coords[7], VoxelCoord::new(1, 1, 1));
    }

    #[test]
    fn empty_region_yields_nothing() {
        let r = Region::new(VoxelCoord::new(2, 0, 0), VoxelCoord::new(1, 5, 5));
        assert!(r.is_empty());
        assert_eq!(r.volume(), 0);
        assert_eq!(r.iter().count(), 0);
    }

    #[test]
    fn intersect_clips_to_overlap() {
        let a = Region::from_dims(10, 10, 10);
        let b = Region::new(VoxelCoord::new(8, -3, 5), VoxelCoord::new(20, 2, 6));
        let i = a.intersect(&b).unwrap();
        assert_eq!(i.min, VoxelCoord::new(8, 0, 5));
        assert_eq!(i.max, VoxelCoord::new(9, 2, 6));
        assert_eq!(i.volume(), 2 * 3 * 2);

        let far = Region::new(VoxelCoord::new(50, 50, 50), VoxelCoord::new(60, 60, 60));
        assert!(a.intersect(&far).is_none());
    }

    #[test]
    fn contains_is_inclusive() {
        let r = Region::from_dims(4, 4, 4);
        assert!(r.contains(VoxelCoord::new(3, 3, 3)));
        assert!(r.contains(VoxelCoord::new(0, 0, 0)));
        assert!(!r.contains(VoxelCoord::new(4, 0, 0)));
        assert!(!r.contains(VoxelCoord::new(0, -1, 0)));
    }
}
