use crate::store::{StoreError, cbor_deserialize, cbor_serialize, zstd_compress, zstd_decompress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use terrarium_common::{Region, VoxelCoord};
use terrarium_kernel::{GridData, VoxelGrid};
use terrarium_store::{STATIC_TERRAIN, StaticAttributes};

/// Everything persisted for one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelRecord {
    pub coord: VoxelCoord,
    pub grid: GridData,
    pub attrs: StaticAttributes,
}

/// Content-hashed capture of every non-background voxel in a region.
///
/// Transient state (velocity, in-flight moves) is not captured. An
/// entity-backed terrain id is stored as is but restored as static terrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub region: Region,
    pub records: Vec<VoxelRecord>,
    /// FNV-1a over the region and records.
    pub hash: u64,
}

impl RegionSnapshot {
    /// Capture `region`, clipped to the grid bounds.
    pub fn capture(grid: &VoxelGrid, region: Region) -> Result<Self, StoreError> {
        let Some(region) = grid.bounds().intersect(&region) else {
            return Err(StoreError::RegionOutOfBounds {
                region,
                bounds: grid.bounds(),
            });
        };

        let coords = grid.occupied_in_region(&region);
        let store = grid.terrain().read_terrain_grid();
        let records: Vec<VoxelRecord> = coords
            .into_iter()
            .map(|c| {
                let attrs = store.static_attributes(c);
                VoxelRecord {
                    coord: c,
                    grid: GridData {
                        terrain_id: attrs.terrain_id,
                        entity_id: grid.get_entity(c),
                        event_id: grid.get_event(c),
                        lighting_level: grid.get_lighting_level(c),
                    },
                    attrs,
                }
            })
            .collect();
        drop(store);

        let hash = content_hash(&region, &records);
        tracing::debug!(?region, voxels = records.len(), hash, "region captured");
        Ok(Self {
            region,
            records,
            hash,
        })
    }

    pub fn verify(&self) -> bool {
        self.hash == content_hash(&self.region, &self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the contents of `self.region` in `grid` with the snapshot.
    ///
    /// Voxels active in `grid` are deactivated; their entities are destroyed
    /// once the write lock is released. Returns the number of voxels written.
    pub fn restore(&self, grid: &mut VoxelGrid) -> Result<usize, StoreError> {
        if !self.verify() {
            return Err(StoreError::IntegrityMismatch {
                expected: format!("{:016x}", self.hash),
                actual: format!("{:016x}", content_hash(&self.region, &self.records)),
            });
        }
        let bounds = grid.bounds();
        if bounds.intersect(&self.region) != Some(self.region) {
            return Err(StoreError::RegionOutOfBounds {
                region: self.region,
                bounds,
            });
        }

        let repo = Arc::clone(grid.terrain());
        let stale = grid.occupied_in_region(&self.region);
        {
            let mut guard = repo.lock_terrain_grid();
            for &c in &stale {
                guard.delete_terrain(c);
                grid.delete_entity(c);
                grid.set_event(c, -1);
                grid.set_lighting_level(c, 0.0);
            }
            for record in &self.records {
                let mut attrs = record.attrs;
                if attrs.terrain_id >= 0 {
                    attrs.terrain_id = STATIC_TERRAIN;
                }
                guard.write_static_attributes(record.coord, &attrs);
                grid.set_entity(record.coord, record.grid.entity_id);
                grid.set_event(record.coord, record.grid.event_id);
                grid.set_lighting_level(record.coord, record.grid.lighting_level);
            }
        }
        let reports = repo.process_deferred();
        if !reports.is_empty() {
            tracing::warn!(count = reports.len(), "corruption reported while restoring region");
        }
        tracing::debug!(
            region = ?self.region,
            cleared = stale.len(),
            written = self.records.len(),
            "region restored"
        );
        Ok(self.records.len())
    }

    /// CBOR, then zstd.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        zstd_compress(&cbor_serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        cbor_deserialize(&zstd_decompress(bytes)?)
    }
}

// Hashes the debug representation; float formatting is exact, so equal
// content gives equal text.
fn content_hash(region: &Region, records: &[VoxelRecord]) -> u64 {
    fnv1a_hash(&format!("{region:?}{records:?}"))
}

/// FNV-1a hash of a string.
fn fnv1a_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}
