//! One region file: up to 1024 chunk payloads behind an 8 KiB slot table.
//!
//! Writes land in an in-memory dirty map and only reach disk on [`RegionFile::flush`].
//! A flush either patches the file in place (reusing a slot's range when the new
//! payload fits, appending otherwise) or, once more than half of the file is dead
//! bytes, rewrites every live payload into a fresh file and swaps it in.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::{RegionError, RegionResult};
use crate::header::{RegionHeader, SlotEntry, HEADER_SIZE};
use crate::region::{LocalCoord, RegionCoord, REGION_DIR, SLOT_COUNT};

/// Path of a region file inside a world directory: `<world>/region/r.<rx>.<rz>.xrg`.
pub fn region_path(world_path: &Path, coord: RegionCoord) -> PathBuf {
    world_path.join(REGION_DIR).join(coord.file_name())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Point-in-time numbers for one region file.
#[derive(Debug, Clone, Serialize)]
pub struct RegionStats {
    pub coord: RegionCoord,
    pub live_chunks: usize,
    pub dirty_chunks: usize,
    pub file_len: u64,
    pub used_bytes: u64,
    pub waste_ratio: f64,
}

pub struct RegionFile {
    coord: RegionCoord,
    path: PathBuf,
    /// `None` once disposed.
    file: Option<File>,
    header: RegionHeader,
    header_dirty: bool,
    /// Accepted writes not yet on disk, keyed by slot index. Always wins over the header.
    dirty: BTreeMap<usize, Vec<u8>>,
    max_chunk_size: usize,
    defrag_threshold: f64,
    sync_on_flush: bool,
}

impl RegionFile {
    pub fn open(world_path: impl AsRef<Path>, coord: RegionCoord) -> RegionResult<Self> {
        Self::open_with_config(world_path, coord, &StorageConfig::default())
    }

    /// Open or create the region file for `coord`. A file too short to hold a
    /// header gets a fresh, empty one written straight away.
    pub fn open_with_config(
        world_path: impl AsRef<Path>,
        coord: RegionCoord,
        config: &StorageConfig,
    ) -> RegionResult<Self> {
        let path = region_path(world_path.as_ref(), coord);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let existing_len = file.metadata()?.len();

        let header = if existing_len >= HEADER_SIZE as u64 {
            let mut buf = vec![0u8; HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            Some(RegionHeader::decode(&buf))
        } else {
            None
        };

        let fresh = header.is_none();
        let mut region = Self {
            coord,
            path,
            file: Some(file),
            header: header.unwrap_or_default(),
            header_dirty: false,
            dirty: BTreeMap::new(),
            max_chunk_size: config.max_chunk_size,
            defrag_threshold: config.defrag_threshold,
            sync_on_flush: config.sync_on_flush,
        };

        if fresh {
            region.write_header()?;
            tracing::debug!("Created region ({},{}) at {:?}", coord.x, coord.z, region.path);
        }

        Ok(region)
    }

    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// True when a flush would touch the disk.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.header_dirty
    }

    /// Queue `data` for the slot at `local`. Nothing is written until the next flush.
    ///
    /// Payloads larger than the configured ceiling are logged and dropped, leaving
    /// whatever the slot held before.
    pub fn write_chunk(&mut self, local: LocalCoord, data: impl Into<Vec<u8>>) {
        let data = data.into();
        if data.len() > self.max_chunk_size {
            tracing::warn!(
                "Dropping {} byte write to chunk ({}, {}) of region ({},{}): limit is {} bytes",
                data.len(),
                local.x(),
                local.z(),
                self.coord.x,
                self.coord.z,
                self.max_chunk_size
            );
            return;
        }
        if self.file.is_none() {
            tracing::warn!(
                "Dropping write to chunk ({}, {}): region ({},{}) is closed",
                local.x(),
                local.z(),
                self.coord.x,
                self.coord.z
            );
            return;
        }
        self.dirty.insert(local.index(), data);
    }

    /// Pending writes are returned first; otherwise the committed bytes are read
    /// from disk. A slot whose bytes are cut short on disk reads as `None`.
    pub fn read_chunk(&mut self, local: LocalCoord) -> RegionResult<Option<Vec<u8>>> {
        let index = local.index();
        if let Some(data) = self.dirty.get(&index) {
            return Ok(Some(data.clone()));
        }
        let entry = self.header.get(index);
        self.read_committed(index, entry)
    }

    pub fn has_chunk(&self, local: LocalCoord) -> bool {
        self.has_slot(local.index())
    }

    /// Forget the chunk. Its bytes stay in the file until the next compaction.
    pub fn delete_chunk(&mut self, local: LocalCoord) {
        if self.file.is_none() {
            tracing::warn!(
                "Ignoring delete of chunk ({}, {}): region ({},{}) is closed",
                local.x(),
                local.z(),
                self.coord.x,
                self.coord.z
            );
            return;
        }
        let index = local.index();
        self.dirty.remove(&index);
        self.header.clear(index);
        self.header_dirty = true;
    }

    pub fn chunk_count(&self) -> usize {
        (0..SLOT_COUNT).filter(|&index| self.has_slot(index)).count()
    }

    /// Local positions of every present chunk, in slot order.
    pub fn chunks(&self) -> Vec<LocalCoord> {
        (0..SLOT_COUNT)
            .filter(|&index| self.has_slot(index))
            .map(LocalCoord::from_index)
            .collect()
    }

    /// Share of the file not referenced by any live slot. Pending writes count at
    /// their new length.
    pub fn waste_ratio(&self) -> RegionResult<f64> {
        Ok(waste_ratio(self.used_bytes(), self.file_len()?))
    }

    pub fn stats(&self) -> RegionResult<RegionStats> {
        let file_len = self.file_len()?;
        let used_bytes = self.used_bytes();
        Ok(RegionStats {
            coord: self.coord,
            live_chunks: self.chunk_count(),
            dirty_chunks: self.dirty.len(),
            file_len,
            used_bytes,
            waste_ratio: waste_ratio(used_bytes, file_len),
        })
    }

    /// Commit pending writes and header changes.
    pub fn flush(&mut self) -> RegionResult<()> {
        if !self.is_dirty() {
            return Ok(());
        }

        let waste = self.waste_ratio()?;
        if waste > self.defrag_threshold {
            self.defrag_and_flush()
        } else {
            self.flush_dirty_chunks()
        }
    }

    /// Flush and close. Further calls do nothing, unless a failed compaction
    /// lost the handle with writes still pending; that keeps failing with
    /// [`RegionError::Closed`] so the caller knows the writes are not on disk.
    pub fn dispose(&mut self) -> RegionResult<()> {
        if self.file.is_none() {
            if self.is_dirty() {
                return Err(RegionError::Closed {
                    path: self.path.clone(),
                });
            }
            return Ok(());
        }
        self.flush()?;
        self.file = None;
        tracing::debug!("Closed region ({},{})", self.coord.x, self.coord.z);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn slot(&self, local: LocalCoord) -> SlotEntry {
        self.header.get(local.index())
    }

    fn has_slot(&self, index: usize) -> bool {
        self.dirty.contains_key(&index) || !self.header.get(index).is_empty()
    }

    fn used_bytes(&self) -> u64 {
        let payloads: u64 = self
            .header
            .iter()
            .map(|(index, entry)| match self.dirty.get(&index) {
                Some(data) => data.len() as u64,
                None => entry.committed_len(),
            })
            .sum();
        HEADER_SIZE as u64 + payloads
    }

    fn file_ref(&self) -> RegionResult<&File> {
        self.file.as_ref().ok_or_else(|| RegionError::Closed {
            path: self.path.clone(),
        })
    }

    fn file_mut(&mut self) -> RegionResult<&mut File> {
        open_handle(&mut self.file, &self.path)
    }

    fn file_len(&self) -> RegionResult<u64> {
        Ok(self.file_ref()?.metadata()?.len())
    }

    fn read_committed(&mut self, index: usize, entry: SlotEntry) -> RegionResult<Option<Vec<u8>>> {
        if !entry.has_data() {
            return Ok(None);
        }

        let coord = self.coord;
        let local = LocalCoord::from_index(index);
        let file = self.file_mut()?;
        let file_len = file.metadata()?.len();
        let end = entry.offset as i64 + entry.length as i64;
        if entry.offset < HEADER_SIZE as i32 || entry.length < 0 || end as u64 > file_len {
            tracing::warn!(
                "Chunk ({}, {}) of region ({},{}) points at bytes {}..{} but the file holds {}, treating it as missing",
                local.x(),
                local.z(),
                coord.x,
                coord.z,
                entry.offset,
                end,
                file_len
            );
            return Ok(None);
        }

        let mut buf = vec![0u8; entry.length as usize];
        file.seek(SeekFrom::Start(entry.offset as u64))?;
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(Some(buf)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::warn!(
                    "Short read for chunk ({}, {}) of region ({},{}): expected {} bytes, treating it as missing",
                    local.x(),
                    local.z(),
                    coord.x,
                    coord.z,
                    entry.length
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_header(&mut self) -> RegionResult<()> {
        let bytes = self.header.encode();
        let sync = self.sync_on_flush;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bytes)?;
        file.flush()?;
        if sync {
            file.sync_data()?;
        }
        self.header_dirty = false;
        Ok(())
    }

    /// Incremental flush: payload bytes first, header last, so a crash in between
    /// leaves the old header pointing at the old bytes.
    fn flush_dirty_chunks(&mut self) -> RegionResult<()> {
        let Self {
            path,
            file,
            header,
            header_dirty,
            dirty,
            sync_on_flush,
            ..
        } = self;
        let file = open_handle(file, path)?;
        let mut end = file.seek(SeekFrom::End(0))?;
        let (mut reused, mut appended) = (0usize, 0usize);

        for (&index, data) in dirty.iter() {
            let length = i32::try_from(data.len()).map_err(|_| RegionError::FileTooLarge {
                path: path.clone(),
                size: data.len() as u64,
            })?;
            let slot = header.get(index);

            if slot.offset >= HEADER_SIZE as i32 && slot.length >= length {
                file.seek(SeekFrom::Start(slot.offset as u64))?;
                file.write_all(data)?;
                header.set(index, SlotEntry { offset: slot.offset, length });
                reused += 1;
            } else {
                let offset = i32::try_from(end).map_err(|_| RegionError::FileTooLarge {
                    path: path.clone(),
                    size: end + data.len() as u64,
                })?;
                file.seek(SeekFrom::Start(end))?;
                file.write_all(data)?;
                header.set(index, SlotEntry { offset, length });
                end += data.len() as u64;
                appended += 1;
            }
            *header_dirty = true;
        }

        file.flush()?;
        if *sync_on_flush {
            file.sync_data()?;
        }
        dirty.clear();
        self.write_header()?;

        tracing::debug!(
            "Flushed region ({},{}): {} reused in place, {} appended",
            self.coord.x,
            self.coord.z,
            reused,
            appended
        );
        Ok(())
    }

    /// Full compaction: copy every live payload into `<path>.tmp` back to back,
    /// then swap it in for the current file.
    fn defrag_and_flush(&mut self) -> RegionResult<()> {
        let before = self.file_len()?;

        let mut committed = BTreeMap::new();
        for index in 0..SLOT_COUNT {
            if self.dirty.contains_key(&index) {
                continue;
            }
            let entry = self.header.get(index);
            if entry.is_empty() {
                continue;
            }
            if entry.offset != 0 && entry.length == 0 {
                committed.insert(index, Vec::new());
            } else if let Some(data) = self.read_committed(index, entry)? {
                committed.insert(index, data);
            }
        }

        let tmp_path = temp_path(&self.path);
        let header = match self.write_compacted(&tmp_path, &committed) {
            Ok(header) => header,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        self.file = None;
        if let Err(e) = swap_in(&tmp_path, &self.path) {
            // Pending writes stay in the dirty map. Reattach to whatever is at
            // the path so a later flush can retry.
            self.file = OpenOptions::new().read(true).write(true).open(&self.path).ok();
            tracing::error!(
                "Failed to swap compacted region ({},{}) into place: {}",
                self.coord.x,
                self.coord.z,
                e
            );
            return Err(e.into());
        }
        self.file = Some(OpenOptions::new().read(true).write(true).open(&self.path)?);

        self.header = header;
        self.dirty.clear();
        self.header_dirty = false;

        tracing::info!(
            "Defragmented region ({},{}): {} -> {} bytes",
            self.coord.x,
            self.coord.z,
            before,
            self.file_len()?
        );
        Ok(())
    }

    fn write_compacted(
        &self,
        tmp_path: &Path,
        committed: &BTreeMap<usize, Vec<u8>>,
    ) -> RegionResult<RegionHeader> {
        let mut header = RegionHeader::default();
        let mut writer = BufWriter::new(File::create(tmp_path)?);
        writer.write_all(&[0u8; HEADER_SIZE])?;

        let mut pos = HEADER_SIZE as u64;
        for index in 0..SLOT_COUNT {
            let Some(data) = self.dirty.get(&index).or_else(|| committed.get(&index)) else {
                continue;
            };
            let offset = i32::try_from(pos).map_err(|_| RegionError::FileTooLarge {
                path: self.path.clone(),
                size: pos + data.len() as u64,
            })?;
            writer.write_all(data)?;
            header.set(
                index,
                SlotEntry {
                    offset,
                    length: data.len() as i32,
                },
            );
            pos += data.len() as u64;
        }

        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header.encode())?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if self.sync_on_flush {
            file.sync_all()?;
        }
        Ok(header)
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::error!(
                "Failed to close region ({},{}): {}",
                self.coord.x,
                self.coord.z,
                e
            );
        }
    }
}

fn open_handle<'a>(file: &'a mut Option<File>, path: &Path) -> RegionResult<&'a mut File> {
    file.as_mut().ok_or_else(|| RegionError::Closed {
        path: path.to_path_buf(),
    })
}

/// Replace `path` with `tmp_path`. Some platforms refuse to rename over an
/// existing file, so the old one is removed first.
fn swap_in(tmp_path: &Path, path: &Path) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
    }
    fs::rename(tmp_path, path)
}

fn waste_ratio(used: u64, file_len: u64) -> f64 {
    if file_len <= HEADER_SIZE as u64 {
        return 0.0;
    }
    (1.0 - used as f64 / file_len as f64).max(0.0)
}
