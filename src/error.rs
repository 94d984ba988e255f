// ============================================================================
// ERRORS: everything that can go wrong on a tile surface
// ============================================================================

/// Error type for tile-cache operations.
///
/// Lookups and drawing never produce errors for absent tiles; only direct
/// storage access, disk offload, and the container stream can fail.
#[derive(Debug)]
pub enum CacheError {
    /// Direct storage-index access outside the allocated grid.
    OutOfBoundsAccess { column: i32, row: i32 },
    /// I/O failure while saving or loading a tile-cache file.
    Offload(std::io::Error),
    /// Tile-cache file header or tile stream does not add up.
    CorruptCacheFile(String),
    /// A save or load task is in flight on this surface.
    SurfaceBusy,
    /// Tile images live on disk; schedule a load first.
    SurfaceOffloaded,
    /// A load was requested but nothing has been saved.
    NotOffloaded,
    /// Raw surface stream could not be (de)serialized.
    Serialize(String),
    /// GPU path failed (target too large, readback mapping error).
    Gpu(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::OutOfBoundsAccess { column, row } => {
                write!(f, "Storage index ({}, {}) is out of bounds", column, row)
            }
            CacheError::Offload(e) => write!(f, "Offload I/O error: {}", e),
            CacheError::CorruptCacheFile(e) => write!(f, "Corrupt tile cache file: {}", e),
            CacheError::SurfaceBusy => write!(f, "Surface is busy with an offload task"),
            CacheError::SurfaceOffloaded => write!(f, "Surface tiles are offloaded to disk"),
            CacheError::NotOffloaded => write!(f, "Surface has no offloaded tile file"),
            CacheError::Serialize(e) => write!(f, "Serialization error: {}", e),
            CacheError::Gpu(e) => write!(f, "GPU error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Offload(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Offload(e)
    }
}

impl From<Box<bincode::ErrorKind>> for CacheError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        CacheError::Serialize(e.to_string())
    }
}
