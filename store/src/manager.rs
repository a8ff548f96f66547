use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;

use crate::config::StorageConfig;
use crate::error::{RegionError, RegionResult};
use crate::region::{ChunkCoord, LocalCoord, RegionCoord, REGION_DIR};
use crate::region_file::{region_path, RegionFile};

/// Keeps a bounded set of region files open for one world directory.
///
/// Not synchronized: callers sharing a manager across threads wrap it in a
/// single lock, since lookup, eviction and `close_all` all reshape the cache.
pub struct RegionManager {
    world_path: PathBuf,
    config: StorageConfig,
    /// Open regions keyed by [`RegionCoord::pack`], most recently used first.
    regions: LruCache<u64, RegionFile>,
}

impl RegionManager {
    pub fn new(world_path: impl Into<PathBuf>) -> RegionResult<Self> {
        Self::with_config(world_path, StorageConfig::default())
    }

    pub fn with_config(world_path: impl Into<PathBuf>, config: StorageConfig) -> RegionResult<Self> {
        config.validate()?;
        let capacity =
            NonZeroUsize::new(config.max_open_regions).ok_or_else(|| RegionError::InvalidConfig {
                field: "max_open_regions",
                reason: "must be at least 1".into(),
            })?;

        Ok(Self {
            world_path: world_path.into(),
            config,
            regions: LruCache::new(capacity),
        })
    }

    pub fn world_path(&self) -> &Path {
        &self.world_path
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.regions.cap().get()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Whether `coord` is open. Does not count as a use.
    pub fn is_cached(&self, coord: RegionCoord) -> bool {
        self.regions.contains(&coord.pack())
    }

    /// Open regions, most recently used first.
    pub fn cached_regions(&self) -> Vec<RegionCoord> {
        self.regions.iter().map(|(&key, _)| RegionCoord::unpack(key)).collect()
    }

    /// Get the region for `coord`, opening (or creating) its file on a miss and
    /// closing the least recently used region if the cache is full.
    pub fn get_region(&mut self, coord: RegionCoord) -> RegionResult<&mut RegionFile> {
        let key = coord.pack();
        if !self.regions.contains(&key) {
            let region = RegionFile::open_with_config(&self.world_path, coord, &self.config)?;
            if self.regions.len() >= self.capacity() {
                self.evict_oldest()?;
            }
            self.regions.put(key, region);
            tracing::debug!(
                "Opened region ({},{}), {} of {} open",
                coord.x,
                coord.z,
                self.regions.len(),
                self.capacity()
            );
        }

        self.regions
            .get_mut(&key)
            .ok_or_else(|| RegionError::Closed {
                path: region_path(&self.world_path, coord),
            })
    }

    /// Dispose the least recently used region. A region that fails to flush is
    /// put back at the tail so its pending writes are not lost.
    pub fn evict_oldest(&mut self) -> RegionResult<Option<RegionCoord>> {
        let Some((key, mut region)) = self.regions.pop_lru() else {
            return Ok(None);
        };
        let coord = RegionCoord::unpack(key);

        if let Err(e) = region.dispose() {
            tracing::error!("Failed to evict region ({},{}): {}", coord.x, coord.z, e);
            self.regions.put(key, region);
            self.regions.demote(&key);
            return Err(e);
        }

        tracing::debug!("Evicted region ({},{})", coord.x, coord.z);
        Ok(Some(coord))
    }

    /// Dispose a single region. Returns whether it was open.
    pub fn close_region(&mut self, coord: RegionCoord) -> RegionResult<bool> {
        let key = coord.pack();
        let Some(mut region) = self.regions.pop(&key) else {
            return Ok(false);
        };

        if let Err(e) = region.dispose() {
            tracing::error!("Failed to close region ({},{}): {}", coord.x, coord.z, e);
            self.regions.put(key, region);
            return Err(e);
        }
        Ok(true)
    }

    /// Flush every open region, keeping them open. Used for autosave. A failing
    /// region does not stop the rest; the first failure is returned.
    pub fn flush_all(&mut self) -> RegionResult<()> {
        let mut first_err = None;
        for (&key, region) in self.regions.iter_mut() {
            if let Err(e) = region.flush() {
                let coord = RegionCoord::unpack(key);
                tracing::error!("Failed to flush region ({},{}): {}", coord.x, coord.z, e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Dispose every open region and empty the cache. All regions are attempted;
    /// the first failure is returned.
    pub fn close_all(&mut self) -> RegionResult<()> {
        let mut first_err = None;
        let mut closed = 0usize;
        while let Some((key, mut region)) = self.regions.pop_lru() {
            let coord = RegionCoord::unpack(key);
            match region.dispose() {
                Ok(()) => closed += 1,
                Err(e) => {
                    tracing::error!("Failed to close region ({},{}): {}", coord.x, coord.z, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        tracing::debug!("Closed {} regions in {:?}", closed, self.world_path);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Coordinates of every region file present in the world directory,
    /// whether open or not.
    pub fn list_region_files(&self) -> RegionResult<Vec<RegionCoord>> {
        let dir = self.world_path.join(REGION_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut coords = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(coord) = entry.file_name().to_str().and_then(RegionCoord::from_file_name) {
                coords.push(coord);
            }
        }
        coords.sort_by_key(|coord| (coord.x, coord.z));
        Ok(coords)
    }

    pub fn region_coord(chunk: ChunkCoord) -> RegionCoord {
        chunk.region()
    }

    pub fn local_coord(chunk: ChunkCoord) -> LocalCoord {
        chunk.local()
    }

    pub fn read_chunk(&mut self, chunk: ChunkCoord) -> RegionResult<Option<Vec<u8>>> {
        self.get_region(chunk.region())?.read_chunk(chunk.local())
    }

    pub fn write_chunk(&mut self, chunk: ChunkCoord, data: impl Into<Vec<u8>>) -> RegionResult<()> {
        self.get_region(chunk.region())?
            .write_chunk(chunk.local(), data);
        Ok(())
    }

    pub fn has_chunk(&mut self, chunk: ChunkCoord) -> RegionResult<bool> {
        Ok(self.get_region(chunk.region())?.has_chunk(chunk.local()))
    }

    pub fn delete_chunk(&mut self, chunk: ChunkCoord) -> RegionResult<()> {
        self.get_region(chunk.region())?
            .delete_chunk(chunk.local());
        Ok(())
    }
}
