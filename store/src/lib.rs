//! Region-based chunk storage.
//!
//! Chunks are opaque byte blobs grouped 32x32 into region files
//! (`<world>/region/r.<rx>.<rz>.xrg`). A [`RegionFile`] buffers writes and
//! commits them on flush; a [`RegionManager`] keeps a bounded, least recently
//! used set of region files open for a world.

pub mod config;
pub mod error;
pub mod header;
pub mod manager;
pub mod region;
pub mod region_file;

pub use config::StorageConfig;
pub use error::{RegionError, RegionResult};
pub use manager::RegionManager;
pub use region::{local_coord, region_coord, ChunkCoord, LocalCoord, RegionCoord};
pub use region_file::{RegionFile, RegionStats};

#[cfg(test)]
pub(crate) mod test_support {
    /// Route `tracing` output through the test harness. Filter with `RUST_LOG`.
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("region_store=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    }
}
