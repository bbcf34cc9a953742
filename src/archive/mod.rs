//! Archive access layer.
//!
//! Reads raw tile payloads out of an MBTiles (SQLite) archive:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              TileArchive (trait)             │
//! │      read_tile(z, x, y) -> Bytes             │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │               MbtilesArchive                 │
//! │  - read-only rusqlite connection             │
//! │  - queries on the blocking pool              │
//! │  - deferred open failures replayed per read  │
//! └──────────────────────┬───────────────────────┘
//!                        │  StoredPayload (BLOB / base64 TEXT)
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │                    codec                     │
//! │  decode_transport -> inflate (gzip / zlib)   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Keys are in the archive's TMS row order; the XYZ to TMS flip lives with
//! the tile coordinate.

mod codec;
mod mbtiles;
mod metadata;
mod reader;

pub use codec::{decode_transport, detect_compression, inflate, Compression, StoredPayload};
pub use mbtiles::{MbtilesArchive, DEFAULT_ARCHIVE_READERS};
pub use metadata::ArchiveMetadata;
pub use reader::{CapabilityProbe, SqliteProbe, TileArchive, MIN_SQLITE_VERSION};
