//! Leaf-blocked sparse grid.
//!
//! Space is cut into 8x8x8 leaves. Only leaves that were written exist; each
//! holds a dense value block and an active mask. Reads of anything not
//! active return the grid's background value.

use std::collections::HashMap;
use terrarium_common::{Region, VoxelCoord};

const LEAF_LOG2: i32 = 3;
const LEAF_DIM: i32 = 1 << LEAF_LOG2;
const LEAF_MASK: i32 = LEAF_DIM - 1;
const LEAF_VOLUME: usize = (LEAF_DIM * LEAF_DIM * LEAF_DIM) as usize;
const MASK_WORDS: usize = LEAF_VOLUME / 64;

/// Key of the leaf containing a coordinate. Arithmetic shift keeps negative
/// coordinates in the right leaf.
fn leaf_key(c: VoxelCoord) -> VoxelCoord {
    VoxelCoord::new(c.x >> LEAF_LOG2, c.y >> LEAF_LOG2, c.z >> LEAF_LOG2)
}

fn leaf_offset(c: VoxelCoord) -> usize {
    ((c.x & LEAF_MASK) | ((c.y & LEAF_MASK) << LEAF_LOG2) | ((c.z & LEAF_MASK) << (2 * LEAF_LOG2)))
        as usize
}

fn offset_to_coord(key: VoxelCoord, offset: usize) -> VoxelCoord {
    let o = offset as i32;
    VoxelCoord::new(
        (key.x << LEAF_LOG2) | (o & LEAF_MASK),
        (key.y << LEAF_LOG2) | ((o >> LEAF_LOG2) & LEAF_MASK),
        (key.z << LEAF_LOG2) | ((o >> (2 * LEAF_LOG2)) & LEAF_MASK),
    )
}

#[derive(Debug, Clone)]
struct Leaf<T> {
    values: Box<[T]>,
    mask: [u64; MASK_WORDS],
    active: u32,
}

impl<T: Copy> Leaf<T> {
    fn new(background: T) -> Self {
        Self {
            values: vec![background; LEAF_VOLUME].into_boxed_slice(),
            mask: [0; MASK_WORDS],
            active: 0,
        }
    }

    fn is_on(&self, offset: usize) -> bool {
        self.mask[offset / 64] & (1u64 << (offset % 64)) != 0
    }

    fn turn_on(&mut self, offset: usize) {
        if !self.is_on(offset) {
            self.mask[offset / 64] |= 1u64 << (offset % 64);
            self.active += 1;
        }
    }

    fn turn_off(&mut self, offset: usize) {
        if self.is_on(offset) {
            self.mask[offset / 64] &= !(1u64 << (offset % 64));
            self.active -= 1;
        }
    }

    fn on_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter().enumerate().flat_map(|(w, &bits)| {
            let mut bits = bits;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + tz)
            })
        })
    }
}

/// Sparse 3D grid of `T` with a background value.
#[derive(Debug, Clone)]
pub struct SparseGrid<T> {
    background: T,
    leaves: HashMap<VoxelCoord, Leaf<T>>,
}

impl<T: Copy + PartialEq> SparseGrid<T> {
    pub fn new(background: T) -> Self {
        Self {
            background,
            leaves: HashMap::new(),
        }
    }

    pub fn background(&self) -> T {
        self.background
    }

    /// Value at `c`, or the background if `c` is not active.
    pub fn get(&self, c: VoxelCoord) -> T {
        match self.leaves.get(&leaf_key(c)) {
            Some(leaf) => {
                let off = leaf_offset(c);
                if leaf.is_on(off) {
                    leaf.values[off]
                } else {
                    self.background
                }
            }
            None => self.background,
        }
    }

    pub fn is_on(&self, c: VoxelCoord) -> bool {
        self.leaves
            .get(&leaf_key(c))
            .is_some_and(|leaf| leaf.is_on(leaf_offset(c)))
    }

    /// Write `value` at `c` and mark it active.
    pub fn set(&mut self, c: VoxelCoord, value: T) {
        let background = self.background;
        let leaf = self
            .leaves
            .entry(leaf_key(c))
            .or_insert_with(|| Leaf::new(background));
        let off = leaf_offset(c);
        leaf.values[off] = value;
        leaf.turn_on(off);
    }

    /// Write `value`, or deactivate `c` if `value` equals the background.
    pub fn assign(&mut self, c: VoxelCoord, value: T) {
        if value == self.background {
            self.set_off(c);
        } else {
            self.set(c, value);
        }
    }

    /// Deactivate `c`. Returns the value it held if it was active.
    pub fn set_off(&mut self, c: VoxelCoord) -> Option<T> {
        let background = self.background;
        let leaf = self.leaves.get_mut(&leaf_key(c))?;
        let off = leaf_offset(c);
        if !leaf.is_on(off) {
            return None;
        }
        let old = leaf.values[off];
        leaf.values[off] = background;
        leaf.turn_off(off);
        Some(old)
    }

    /// Every active voxel. Order is unspecified.
    pub fn iter_on(&self) -> impl Iterator<Item = (VoxelCoord, T)> + '_ {
        self.leaves.iter().flat_map(|(key, leaf)| {
            leaf.on_offsets()
                .map(move |off| (offset_to_coord(*key, off), leaf.values[off]))
        })
    }

    /// Active voxels inside `region`, sorted by coordinate.
    pub fn iter_region(&self, region: &Region) -> Vec<(VoxelCoord, T)> {
        if region.is_empty() {
            return Vec::new();
        }
        let lo = leaf_key(region.min);
        let hi = leaf_key(region.max);
        let mut out: Vec<(VoxelCoord, T)> = self
            .leaves
            .iter()
            .filter(|(k, _)| {
                k.x >= lo.x && k.x <= hi.x && k.y >= lo.y && k.y <= hi.y && k.z >= lo.z && k.z <= hi.z
            })
            .flat_map(|(key, leaf)| {
                leaf.on_offsets()
                    .map(move |off| (offset_to_coord(*key, off), leaf.values[off]))
            })
            .filter(|(c, _)| region.contains(*c))
            .collect();
        out.sort_by_key(|(c, _)| (c.z, c.y, c.x));
        out
    }

    pub fn active_count(&self) -> usize {
        self.leaves.values().map(|l| l.active as usize).sum()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Drop leaves with no active voxels. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.leaves.len();
        self.leaves.retain(|_, leaf| leaf.active > 0);
        before - self.leaves.len()
    }

    pub fn clear(&mut self) {
        self.leaves.clear();
    }

    /// Approximate heap footprint in bytes.
    pub fn mem_usage(&self) -> usize {
        let per_leaf = LEAF_VOLUME * std::mem::size_of::<T>() + std::mem::size_of::<Leaf<T>>();
        self.leaves.len() * (per_leaf + std::mem::size_of::<VoxelCoord>())
    }

    /// Read accessor caching the last visited leaf.
    pub fn accessor(&self) -> GridAccessor<'_, T> {
        GridAccessor {
            grid: self,
            cached_key: None,
            cached_leaf: None,
            hits: 0,
        }
    }
}

/// Borrowing read accessor. Coordinate-local scans hit the cached leaf and
/// skip the hash lookup. It cannot outlive the grid it reads.
pub struct GridAccessor<'a, T> {
    grid: &'a SparseGrid<T>,
    cached_key: Option<VoxelCoord>,
    cached_leaf: Option<&'a Leaf<T>>,
    hits: u64,
}

impl<'a, T: Copy + PartialEq> GridAccessor<'a, T> {
    pub fn get(&mut self, c: VoxelCoord) -> T {
        let key = leaf_key(c);
        if self.cached_key == Some(key) {
            self.hits += 1;
        } else {
            self.cached_key = Some(key);
            self.cached_leaf = self.grid.leaves.get(&key);
        }
        match self.cached_leaf {
            Some(leaf) => {
                let off = leaf_offset(c);
                if leaf.is_on(off) {
                    leaf.values[off]
                } else {
                    self.grid.background
                }
            }
            None => self.grid.background,
        }
    }

    pub fn is_on(&mut self, c: VoxelCoord) -> bool {
        let key = leaf_key(c);
        if self.cached_key != Some(key) {
            self.cached_key = Some(key);
            self.cached_leaf = self.grid.leaves.get(&key);
        }
        self.cached_leaf.is_some_and(|leaf| leaf.is_on(leaf_offset(c)))
    }

    /// Lookups served from the cached leaf.
    pub fn cache_hits(&self) -> u64 {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_reads_background() {
        let g: SparseGrid<i32> = SparseGrid::new(-2);
        assert_eq!(g.get(VoxelCoord::new(0, 0, 0)), -2);
        assert_eq!(g.get(VoxelCoord::new(-100, 5, 1_000_000)), -2);
        assert!(!g.is_on(VoxelCoord::new(0, 0, 0)));
        assert_eq!(g.active_count(), 0);
    }

    #[test]
    fn set_get_negative_coords() {
        let mut g = SparseGrid::new(0i32);
        let c = VoxelCoord::new(-1, -9, -17);
        g.set(c, 42);
        assert_eq!(g.get(c), 42);
        assert!(g.is_on(c));
        assert_eq!(g.get(VoxelCoord::new(-2, -9, -17)), 0);
        let all: Vec<_> = g.iter_on().collect();
        assert_eq!(all, vec![(c, 42)]);
    }

    #[test]
    fn set_background_value_still_active() {
        let mut g = SparseGrid::new(0i32);
        let c = VoxelCoord::new(1, 1, 1);
        g.set(c, 0);
        assert!(g.is_on(c));
        g.assign(c, 0);
        assert!(!g.is_on(c));
    }

    #[test]
    fn set_off_restores_background() {
        let mut g = SparseGrid::new(-1i32);
        let c = VoxelCoord::new(3, 4, 5);
        g.set(c, 7);
        assert_eq!(g.set_off(c), Some(7));
        assert_eq!(g.get(c), -1);
        assert_eq!(g.set_off(c), None);
        assert_eq!(g.leaf_count(), 1);
        assert_eq!(g.prune(), 1);
        assert_eq!(g.leaf_count(), 0);
    }

    #[test]
    fn region_query_sorted_and_clipped() {
        let mut g = SparseGrid::new(0i32);
        for x in 0..20 {
            g.set(VoxelCoord::new(x, 0, 0), x);
        }
        g.set(VoxelCoord::new(5, 0, 1), 99);
        let r = Region::new(VoxelCoord::new(4, 0, 0), VoxelCoord::new(9, 0, 1));
        let hits = g.iter_region(&r);
        assert_eq!(hits.len(), 7);
        assert_eq!(hits[0], (VoxelCoord::new(4, 0, 0), 4));
        assert_eq!(hits[5], (VoxelCoord::new(9, 0, 0), 9));
        assert_eq!(hits[6], (VoxelCoord::new(5, 0, 1), 99));
    }

    #[test]
    fn accessor_caches_leaf() {
        let mut g = SparseGrid::new(0i32);
        g.set(VoxelCoord::new(1, 1, 1), 5);
        let mut acc = g.accessor();
        assert_eq!(acc.get(VoxelCoord::new(1, 1, 1)), 5);
        assert_eq!(acc.get(VoxelCoord::new(2, 1, 1)), 0);
        assert_eq!(acc.get(VoxelCoord::new(1, 1, 1)), 5);
        assert_eq!(acc.cache_hits(), 2);
        assert_eq!(acc.get(VoxelCoord::new(100, 1, 1)), 0);
        assert!(acc.is_on(VoxelCoord::new(1, 1, 1)));
    }

    #[test]
    fn mem_usage_grows_with_leaves() {
        let mut g = SparseGrid::new(0i32);
        assert_eq!(g.mem_usage(), 0);
        g.set(VoxelCoord::new(0, 0, 0), 1);
        let one = g.mem_usage();
        g.set(VoxelCoord::new(1, 0, 0), 1);
        assert_eq!(g.mem_usage(), one);
        g.set(VoxelCoord::new(64, 0, 0), 1);
        assert!(g.mem_usage() > one);
        g.clear();
        assert_eq!(g.active_count(), 0);
    }
}
