//! Bounded voxel world: the terrain repository plus per-voxel entity, event
//! and lighting layers.

use crate::repository::{TerrainError, TerrainRepository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use terrarium_common::{EntityType, Region, VoxelCoord};
use terrarium_store::{NO_TERRAIN, STATIC_TERRAIN, SparseGrid};

/// Layer values of one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridData {
    pub terrain_id: i32,
    pub entity_id: i32,
    pub event_id: i32,
    pub lighting_level: f32,
}

impl Default for GridData {
    fn default() -> Self {
        Self {
            terrain_id: NO_TERRAIN,
            entity_id: -1,
            event_id: -1,
            lighting_level: 0.0,
        }
    }
}

pub struct VoxelGrid {
    width: i32,
    height: i32,
    depth: i32,
    terrain: Arc<TerrainRepository>,
    entity_grid: SparseGrid<i32>,
    event_grid: SparseGrid<i32>,
    lighting_grid: SparseGrid<f32>,
}

impl VoxelGrid {
    pub fn new(width: i32, height: i32, depth: i32) -> Self {
        Self::with_repository(width, height, depth, Arc::new(TerrainRepository::new()))
    }

    pub fn with_repository(
        width: i32,
        height: i32,
        depth: i32,
        terrain: Arc<TerrainRepository>,
    ) -> Self {
        Self {
            width,
            height,
            depth,
            terrain,
            entity_grid: SparseGrid::new(-1),
            event_grid: SparseGrid::new(-1),
            lighting_grid: SparseGrid::new(0.0),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn bounds(&self) -> Region {
        Region::from_dims(self.width, self.height, self.depth)
    }

    pub fn in_bounds(&self, c: VoxelCoord) -> bool {
        self.bounds().contains(c)
    }

    /// Shared handle to the terrain repository.
    pub fn terrain(&self) -> &Arc<TerrainRepository> {
        &self.terrain
    }

    // --- Terrain layer ---

    /// Raw terrain id at `c`, `-2` if none.
    pub fn get_terrain(&self, c: VoxelCoord) -> i32 {
        self.terrain.read_terrain_grid().get_terrain_id(c)
    }

    /// `-2` deletes, `-1` marks static terrain. Entity ids are owned by the
    /// repository and rejected here.
    pub fn set_terrain(&self, c: VoxelCoord, id: i32) -> Result<(), TerrainError> {
        match id {
            NO_TERRAIN => {
                self.terrain.delete_terrain(c);
                Ok(())
            }
            STATIC_TERRAIN => {
                self.terrain.mark_terrain(c, EntityType::default());
                Ok(())
            }
            other => Err(TerrainError::ReservedTerrainId(other)),
        }
    }

    pub fn delete_terrain(&self, c: VoxelCoord) -> i32 {
        self.terrain.delete_terrain(c)
    }

    // --- Entity layer ---

    pub fn get_entity(&self, c: VoxelCoord) -> i32 {
        self.entity_grid.get(c)
    }

    pub fn set_entity(&mut self, c: VoxelCoord, id: i32) {
        self.entity_grid.assign(c, id);
    }

    pub fn delete_entity(&mut self, c: VoxelCoord) -> Option<i32> {
        self.entity_grid.set_off(c)
    }

    // --- Event layer ---

    pub fn get_event(&self, c: VoxelCoord) -> i32 {
        self.event_grid.get(c)
    }

    pub fn set_event(&mut self, c: VoxelCoord, id: i32) {
        self.event_grid.assign(c, id);
    }

    // --- Lighting layer ---

    pub fn get_lighting_level(&self, c: VoxelCoord) -> f32 {
        self.lighting_grid.get(c)
    }

    pub fn set_lighting_level(&mut self, c: VoxelCoord, level: f32) {
        self.lighting_grid.assign(c, level);
    }

    // --- Whole voxel ---

    pub fn get_voxel(&self, c: VoxelCoord) -> GridData {
        GridData {
            terrain_id: self.get_terrain(c),
            entity_id: self.get_entity(c),
            event_id: self.get_event(c),
            lighting_level: self.get_lighting_level(c),
        }
    }

    pub fn set_voxel(&mut self, c: VoxelCoord, data: GridData) -> Result<(), TerrainError> {
        self.set_terrain(c, data.terrain_id)?;
        self.set_entity(c, data.entity_id);
        self.set_event(c, data.event_id);
        self.set_lighting_level(c, data.lighting_level);
        Ok(())
    }

    // --- Region queries ---

    fn clip(&self, region: &Region) -> Option<Region> {
        self.bounds().intersect(region)
    }

    pub fn get_all_terrain_in_region(&self, region: &Region) -> Vec<(VoxelCoord, i32)> {
        match self.clip(region) {
            Some(r) => self.terrain.read_terrain_grid().terrain_in_region(&r),
            None => Vec::new(),
        }
    }

    pub fn get_all_terrain_ids_in_region(&self, region: &Region) -> Vec<i32> {
        self.get_all_terrain_in_region(region)
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }

    pub fn get_all_entity_in_region(&self, region: &Region) -> Vec<(VoxelCoord, i32)> {
        self.layer_in_region(&self.entity_grid, region)
    }

    pub fn get_all_entity_ids_in_region(&self, region: &Region) -> Vec<i32> {
        self.get_all_entity_in_region(region)
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }

    pub fn get_all_event_in_region(&self, region: &Region) -> Vec<(VoxelCoord, i32)> {
        self.layer_in_region(&self.event_grid, region)
    }

    pub fn get_all_event_ids_in_region(&self, region: &Region) -> Vec<i32> {
        self.get_all_event_in_region(region)
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }

    pub fn get_all_lighting_in_region(&self, region: &Region) -> Vec<(VoxelCoord, f32)> {
        self.layer_in_region(&self.lighting_grid, region)
    }

    fn layer_in_region<T: Copy + PartialEq>(
        &self,
        grid: &SparseGrid<T>,
        region: &Region,
    ) -> Vec<(VoxelCoord, T)> {
        let Some(r) = self.clip(region) else {
            return Vec::new();
        };
        let bg = grid.background();
        grid.iter_region(&r)
            .into_iter()
            .filter(|(_, v)| *v != bg)
            .collect()
    }

    /// Every coordinate in `region` where any layer or static attribute
    /// differs from its background, in Z-Y-X order.
    pub fn occupied_in_region(&self, region: &Region) -> Vec<VoxelCoord> {
        let Some(r) = self.clip(region) else {
            return Vec::new();
        };
        let mut coords: BTreeSet<(i32, i32, i32)> = self
            .terrain
            .read_terrain_grid()
            .non_background_in_region(&r)
            .into_iter()
            .map(|c| (c.z, c.y, c.x))
            .collect();
        let key = |(c, _): (VoxelCoord, _)| (c.z, c.y, c.x);
        coords.extend(self.get_all_entity_in_region(&r).into_iter().map(key));
        coords.extend(self.get_all_event_in_region(&r).into_iter().map(key));
        coords.extend(
            self.get_all_lighting_in_region(&r)
                .into_iter()
                .map(|(c, _)| (c.z, c.y, c.x)),
        );
        coords
            .into_iter()
            .map(|(z, y, x)| VoxelCoord::new(x, y, z))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: i32, y: i32, z: i32) -> VoxelCoord {
        VoxelCoord::new(x, y, z)
    }

    #[test]
    fn empty_voxel_has_default_layers() {
        let g = VoxelGrid::new(8, 8, 8);
        assert_eq!(g.get_voxel(c(1, 2, 3)), GridData::default());
    }

    #[test]
    fn set_voxel_round_trip() {
        let mut g = VoxelGrid::new(8, 8, 8);
        let data = GridData {
            terrain_id: -1,
            entity_id: 12,
            event_id: 3,
            lighting_level: 0.75,
        };
        g.set_voxel(c(1, 1, 1), data).unwrap();
        assert_eq!(g.get_voxel(c(1, 1, 1)), data);
        assert_eq!(g.delete_entity(c(1, 1, 1)), Some(12));
        assert_eq!(g.get_entity(c(1, 1, 1)), -1);
    }

    #[test]
    fn entity_terrain_ids_are_rejected() {
        let g = VoxelGrid::new(4, 4, 4);
        assert!(matches!(
            g.set_terrain(c(0, 0, 0), 5),
            Err(TerrainError::ReservedTerrainId(5))
        ));
        assert!(matches!(
            g.set_terrain(c(0, 0, 0), -3),
            Err(TerrainError::ReservedTerrainId(-3))
        ));
        g.set_terrain(c(0, 0, 0), -1).unwrap();
        assert_eq!(g.get_terrain(c(0, 0, 0)), -1);
        g.set_terrain(c(0, 0, 0), -2).unwrap();
        assert_eq!(g.get_terrain(c(0, 0, 0)), -2);
    }

    #[test]
    fn region_queries_clip_to_bounds() {
        let mut g = VoxelGrid::new(4, 4, 4);
        g.set_terrain(c(0, 0, 0), -1).unwrap();
        g.set_terrain(c(3, 3, 3), -1).unwrap();
        g.set_event(c(2, 2, 2), 9);
        g.set_lighting_level(c(1, 0, 0), 0.5);

        let everything = Region::new(c(-10, -10, -10), c(10, 10, 10));
        assert_eq!(g.get_all_terrain_ids_in_region(&everything), vec![-1, -1]);
        assert_eq!(g.get_all_event_ids_in_region(&everything), vec![9]);
        assert_eq!(g.get_all_lighting_in_region(&everything), vec![(c(1, 0, 0), 0.5)]);
        assert!(g.get_all_entity_ids_in_region(&everything).is_empty());

        let outside = Region::new(c(5, 5, 5), c(9, 9, 9));
        assert!(g.get_all_terrain_in_region(&outside).is_empty());

        let occupied = g.occupied_in_region(&everything);
        assert_eq!(occupied, vec![c(0, 0, 0), c(1, 0, 0), c(2, 2, 2), c(3, 3, 3)]);
    }

    #[test]
    fn bounds_check() {
        let g = VoxelGrid::new(2, 3, 4);
        assert!(g.in_bounds(c(1, 2, 3)));
        assert!(!g.in_bounds(c(2, 0, 0)));
        assert_eq!(g.bounds().volume(), 24);
    }
}
