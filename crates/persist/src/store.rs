//! File-backed region persistence.
//!
//! Layout inside the store directory:
//! ```text
//! world.meta.json              - schema version and grid dimensions
//! regions/
//!   000001.region.cbor.zst     - CBOR+zstd compressed region snapshots
//! integrity/
//!   manifest.json              - hash chain manifest
//! ```

use crate::snapshot::RegionSnapshot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use terrarium_common::Region;

/// Current schema version of the region format.
const REGION_SCHEMA_VERSION: u32 = 1;

/// Errors from snapshot encoding and file-backed persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("store holds a {stored:?} world, opened as {requested:?}")]
    DimensionMismatch {
        stored: [i32; 3],
        requested: [i32; 3],
    },
    #[error("region {region:?} is outside world bounds {bounds:?}")]
    RegionOutOfBounds { region: Region, bounds: Region },
    #[error("no region snapshot {0}")]
    MissingRegion(u32),
    #[error("no snapshots found")]
    NoSnapshots,
}

/// Metadata stored in world.meta.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMeta {
    pub region_schema_version: u32,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    pub region_count: u32,
}

impl WorldMeta {
    pub fn dims(&self) -> [i32; 3] {
        [self.width, self.height, self.depth]
    }

    pub fn bounds(&self) -> Region {
        Region::from_dims(self.width, self.height, self.depth)
    }
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest tracking all segment hashes in a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// File-backed store of region snapshots for one world size, with schema
/// versioning and a hash-chained manifest.
pub struct WorldStore {
    root: PathBuf,
    meta: WorldMeta,
    manifest: IntegrityManifest,
}

impl WorldStore {
    /// Open the store at `path`, creating it for a `width x height x depth`
    /// world if it does not exist yet.
    pub fn open(
        path: impl AsRef<Path>,
        width: i32,
        height: i32,
        depth: i32,
    ) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("regions"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("world.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: WorldMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.region_schema_version != REGION_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.region_schema_version,
                    expected_version: REGION_SCHEMA_VERSION,
                });
            }
            let requested = [width, height, depth];
            if meta.dims() != requested {
                return Err(StoreError::DimensionMismatch {
                    stored: meta.dims(),
                    requested,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = WorldMeta {
                region_schema_version: REGION_SCHEMA_VERSION,
                width,
                height,
                depth,
                region_count: 0,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };

        tracing::debug!(root = %root.display(), regions = meta.region_count, "world store opened");
        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Write `snapshot` as the next region file. Returns its index.
    pub fn save_region(&mut self, snapshot: &RegionSnapshot) -> Result<u32, StoreError> {
        let bounds = self.meta.bounds();
        if bounds.intersect(&snapshot.region) != Some(snapshot.region) {
            return Err(StoreError::RegionOutOfBounds {
                region: snapshot.region,
                bounds,
            });
        }

        let index = self.meta.region_count + 1;
        let filename = region_filename(index);
        let compressed = snapshot.to_bytes()?;
        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        std::fs::write(self.root.join("regions").join(&filename), &compressed)?;

        self.meta.region_count = index;
        self.manifest.entries.push(ManifestEntry {
            filename,
            sha256: hash,
            prev_hash,
        });
        self.save_meta()?;
        self.save_manifest()?;
        tracing::info!(index, voxels = snapshot.len(), bytes = compressed.len(), "region saved");
        Ok(index)
    }

    /// Load region `index`, checking both the file hash and the snapshot's
    /// content hash.
    pub fn load_region(&self, index: u32) -> Result<RegionSnapshot, StoreError> {
        if index == 0 || index > self.meta.region_count {
            return Err(StoreError::MissingRegion(index));
        }
        let filename = region_filename(index);
        let compressed = std::fs::read(self.root.join("regions").join(&filename))?;
        self.verify_file_hash(&filename, &compressed)?;

        let snapshot = RegionSnapshot::from_bytes(&compressed)?;
        if !snapshot.verify() {
            return Err(StoreError::IntegrityMismatch {
                expected: "valid region hash".into(),
                actual: "region hash mismatch".into(),
            });
        }
        Ok(snapshot)
    }

    pub fn load_latest(&self) -> Result<RegionSnapshot, StoreError> {
        if self.meta.region_count == 0 {
            return Err(StoreError::NoSnapshots);
        }
        self.load_region(self.meta.region_count)
    }

    /// Verify all integrity hashes in the manifest.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(StoreError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }

            let data = std::fs::read(self.root.join("regions").join(&entry.filename))?;
            let actual_hash = sha256_hex(&data);
            if actual_hash != entry.sha256 {
                return Err(StoreError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual: actual_hash,
                });
            }

            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &WorldMeta {
        &self.meta
    }

    fn verify_file_hash(&self, filename: &str, data: &[u8]) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        let Some(entry) = self.manifest.entries.iter().find(|e| e.filename == filename) else {
            return Err(StoreError::IntegrityMismatch {
                expected: format!("manifest entry for {filename}"),
                actual: "none".into(),
            });
        };
        if entry.sha256 != actual {
            return Err(StoreError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        let path = self.root.join("world.meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), StoreError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

fn region_filename(index: u32) -> String {
    format!("{index:06}.region.cbor.zst")
}

pub(crate) fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

pub(crate) fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub(crate) fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
