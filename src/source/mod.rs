//! Source orchestration.
//!
//! [`MbtilesSource`] ties the other layers together: it turns a [`Tile`]'s
//! coordinate into an archive key, reads the payload through a
//! [`TileArchive`], submits it to a [`DecodeDispatcher`] and resolves the
//! tile's state, coalescing reload requests that arrive while a job is in
//! flight.
//!
//! [`Tile`]: crate::tile::Tile
//! [`TileArchive`]: crate::archive::TileArchive
//! [`DecodeDispatcher`]: crate::worker::DecodeDispatcher

mod installer;
mod mbtiles;
mod options;

pub use installer::{DiscardInstaller, TileInstaller};
pub use mbtiles::MbtilesSource;
pub use options::{SourceOptions, DEFAULT_MAX_ZOOM, DEFAULT_SOURCE_ID, DEFAULT_TILE_SIZE};
