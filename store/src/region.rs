use serde::Serialize;

use crate::error::{RegionError, RegionResult};

/// Region edge length in chunks (32x32).
pub const REGION_SIZE: i32 = 32;

/// Shift turning a chunk coordinate into a region coordinate.
pub const REGION_SHIFT: u32 = 5;

/// Mask turning a chunk coordinate into a local coordinate.
pub const LOCAL_MASK: i32 = REGION_SIZE - 1;

/// Number of chunk slots in one region file.
pub const SLOT_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;

/// Region files live in `<world>/region/`.
pub const REGION_DIR: &str = "region";
pub const REGION_FILE_PREFIX: &str = "r.";
pub const REGION_FILE_EXTENSION: &str = "xrg";

/// A chunk position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

/// A region position in world space. Each region covers 32x32 chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RegionCoord {
    pub x: i32,
    pub z: i32,
}

/// A chunk position inside its region, both axes in `[0, 32)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalCoord {
    x: u8,
    z: u8,
}

impl ChunkCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The region this chunk belongs to.
    pub const fn region(self) -> RegionCoord {
        RegionCoord::new(self.x >> REGION_SHIFT, self.z >> REGION_SHIFT)
    }

    /// The chunk's position inside its region.
    pub const fn local(self) -> LocalCoord {
        LocalCoord {
            x: (self.x & LOCAL_MASK) as u8,
            z: (self.z & LOCAL_MASK) as u8,
        }
    }
}

impl RegionCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Pack both halves into a single 64-bit key: x in the high word, z in the low word.
    pub const fn pack(self) -> u64 {
        ((self.x as u32 as u64) << 32) | (self.z as u32 as u64)
    }

    pub const fn unpack(key: u64) -> Self {
        Self::new((key >> 32) as u32 as i32, key as u32 as i32)
    }

    /// Recombine a local coordinate with this region into a world chunk coordinate.
    pub const fn chunk_at(self, local: LocalCoord) -> ChunkCoord {
        ChunkCoord::new(
            self.x * REGION_SIZE + local.x as i32,
            self.z * REGION_SIZE + local.z as i32,
        )
    }

    /// File name of this region, `r.<rx>.<rz>.xrg`.
    pub fn file_name(self) -> String {
        format!("{}{}.{}.{}", REGION_FILE_PREFIX, self.x, self.z, REGION_FILE_EXTENSION)
    }

    /// Parse a region file name produced by [`RegionCoord::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(REGION_FILE_PREFIX)?;
        let rest = rest.strip_suffix(REGION_FILE_EXTENSION)?.strip_suffix('.')?;
        let (x, z) = rest.split_once('.')?;
        Some(Self::new(x.parse().ok()?, z.parse().ok()?))
    }
}

impl LocalCoord {
    /// Build a local coordinate, rejecting anything outside `[0, 32)`.
    pub fn new(x: i32, z: i32) -> RegionResult<Self> {
        if !(0..REGION_SIZE).contains(&x) || !(0..REGION_SIZE).contains(&z) {
            return Err(RegionError::InvalidLocalCoord { x, z });
        }
        Ok(Self { x: x as u8, z: z as u8 })
    }

    /// Inverse of [`LocalCoord::index`]. `index` must be below [`SLOT_COUNT`].
    pub(crate) const fn from_index(index: usize) -> Self {
        Self {
            x: (index % REGION_SIZE as usize) as u8,
            z: (index / REGION_SIZE as usize) as u8,
        }
    }

    pub const fn x(self) -> i32 {
        self.x as i32
    }

    pub const fn z(self) -> i32 {
        self.z as i32
    }

    /// Header slot for this position: `lz * 32 + lx`.
    pub const fn index(self) -> usize {
        self.z as usize * REGION_SIZE as usize + self.x as usize
    }
}

/// Compute which region a chunk falls in.
pub fn region_coord(chunk: ChunkCoord) -> RegionCoord {
    chunk.region()
}

/// Compute the local position of a chunk within its region.
pub fn local_coord(chunk: ChunkCoord) -> LocalCoord {
    chunk.local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_chunks_fall_into_negative_regions() {
        let chunk = ChunkCoord::new(-1, -1);
        assert_eq!(region_coord(chunk), RegionCoord::new(-1, -1));
        let local = local_coord(chunk);
        assert_eq!((local.x(), local.z()), (31, 31));

        let chunk = ChunkCoord::new(-32, -33);
        assert_eq!(chunk.region(), RegionCoord::new(-1, -2));
        assert_eq!((chunk.local().x(), chunk.local().z()), (0, 31));
    }

    #[test]
    fn positive_chunks_split_on_region_boundaries() {
        assert_eq!(ChunkCoord::new(31, 0).region(), RegionCoord::new(0, 0));
        assert_eq!(ChunkCoord::new(32, 0).region(), RegionCoord::new(1, 0));
        let local = ChunkCoord::new(70, 5).local();
        assert_eq!((local.x(), local.z()), (6, 5));
        assert_eq!(local.index(), 5 * 32 + 6);
    }

    #[test]
    fn region_and_local_recombine_into_the_chunk() {
        for &(x, z) in &[(0, 0), (-1, -1), (100, -250), (-4097, 33)] {
            let chunk = ChunkCoord::new(x, z);
            assert_eq!(chunk.region().chunk_at(chunk.local()), chunk);
        }
    }

    #[test]
    fn pack_keeps_both_halves() {
        let coord = RegionCoord::new(-7, 123_456);
        assert_eq!(RegionCoord::unpack(coord.pack()), coord);
        assert_ne!(RegionCoord::new(1, 0).pack(), RegionCoord::new(0, 1).pack());
    }

    #[test]
    fn local_coord_rejects_out_of_range() {
        assert!(LocalCoord::new(32, 0).is_err());
        assert!(LocalCoord::new(0, -1).is_err());
        let local = LocalCoord::new(31, 31).unwrap();
        assert_eq!(local.index(), SLOT_COUNT - 1);
        assert_eq!(LocalCoord::from_index(local.index()), local);
    }

    #[test]
    fn file_names_parse_back() {
        let coord = RegionCoord::new(-3, 12);
        assert_eq!(coord.file_name(), "r.-3.12.xrg");
        assert_eq!(RegionCoord::from_file_name(&coord.file_name()), Some(coord));
        assert_eq!(RegionCoord::from_file_name("r.1.2.xrg.tmp"), None);
        assert_eq!(RegionCoord::from_file_name("level.dat"), None);
        assert_eq!(RegionCoord::from_file_name("r.a.2.xrg"), None);
    }
}
