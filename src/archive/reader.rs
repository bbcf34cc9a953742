use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ArchiveError;

/// Read access to a tile archive keyed by `(zoom_level, tile_column, tile_row)`.
///
/// Keys are in the archive's own row order (TMS for MBTiles); callers are
/// responsible for the coordinate transform. Implementations must be
/// thread-safe; the handle is shared read-only across all tile loads.
#[async_trait]
pub trait TileArchive: Send + Sync {
    /// Read and decompress the payload stored at the given key.
    ///
    /// Returns [`ArchiveError::NotFound`] when no row matches and
    /// [`ArchiveError::Query`] on a storage fault. Never cached: every call
    /// goes to the store.
    async fn read_tile(&self, z: u8, x: u32, y: u32) -> Result<Bytes, ArchiveError>;

    /// Identifier of the archive (for logging).
    fn identifier(&self) -> &str;
}

/// Reports whether the host can open local databases at all.
pub trait CapabilityProbe {
    fn local_database_available(&self) -> bool;
}

/// Oldest SQLite library the accessor accepts.
pub const MIN_SQLITE_VERSION: i32 = 3_008_000;

/// Probes the SQLite library linked into this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProbe;

impl CapabilityProbe for SqliteProbe {
    fn local_database_available(&self) -> bool {
        rusqlite::version_number() >= MIN_SQLITE_VERSION
    }
}
