use std::path::PathBuf;

pub type RegionResult<T> = Result<T, RegionError>;

/// Errors surfaced by region storage. Oversized writes and short reads are
/// absorbed and logged instead of showing up here.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Local chunk coordinate out of range: {x}, {z}")]
    InvalidLocalCoord { x: i32, z: i32 },

    #[error("Region file {path:?} would grow to {size} bytes, past the 32-bit offset limit")]
    FileTooLarge { path: PathBuf, size: u64 },

    #[error("Region file {path:?} is already closed")]
    Closed { path: PathBuf },

    #[error("Invalid config: {field} ({reason})")]
    InvalidConfig { field: &'static str, reason: String },
}
