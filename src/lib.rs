//! # MBTiles Pipeline
//!
//! Asynchronous tile acquisition and decode dispatch for MBTiles archives.
//!
//! This library turns a local, compressed MBTiles archive into decoded tile
//! buffers. It reads a tile's payload from the archive, hands it to a pool of
//! decode workers and resolves the outcome back to the caller, while keeping
//! at most one decode job in flight per tile.
//!
//! ## Features
//!
//! - **TMS-aware reads**: canonical XYZ coordinates are flipped into the archive's row order
//! - **Overscaling**: tiles deeper than the archive's max zoom read their ancestor
//! - **Worker affinity**: reloads always land on the worker that holds the tile's decode state
//! - **Coalesced reloads**: requests arriving mid-flight collapse into one follow-up job
//! - **Abort semantics**: aborted tiles discard results but still signal completion once
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`archive`] - MBTiles accessor, transport decoding and decompression
//! - [`tile`] - Tile coordinates, lifecycle state machine and the tile record
//! - [`worker`] - Decode dispatcher contract and the Tokio worker pool
//! - [`source`] - The orchestrator driving loads through the other layers
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mbtiles_pipeline::{
//!     MbtilesArchive, MbtilesSource, PassthroughDecoder, SourceOptions, Tile, TileCoordinate,
//!     WorkerPool,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let archive = MbtilesArchive::open("world.mbtiles")?;
//!     let pool = WorkerPool::new(4, PassthroughDecoder);
//!     let options = SourceOptions {
//!         max_zoom: 14,
//!         ..SourceOptions::default()
//!     };
//!     let source = MbtilesSource::new(archive, pool, options);
//!
//!     let tile = Arc::new(Tile::new(TileCoordinate::new(5, 3, 10)?));
//!     source.load(&tile).await?;
//!     println!("{:?}", tile.status());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod source;
pub mod tile;
pub mod worker;

// Re-export commonly used types
pub use archive::{ArchiveMetadata, CapabilityProbe, MbtilesArchive, SqliteProbe, TileArchive};
pub use config::{Cli, Command, InspectConfig, LoadConfig};
pub use error::{ArchiveError, DecodeError, LoadError, TileStateError};
pub use source::{DiscardInstaller, MbtilesSource, SourceOptions, TileInstaller};
pub use tile::{
    tms_row, ArchiveKey, CoordinateError, ExpiryData, LoadCallback, Tile, TileCoordinate,
    TileState, TileStatus, TileUid,
};
pub use worker::{
    CachePolicyDecoder, DecodeDispatcher, DecodeRequest, DecodedTile, JobKind,
    PassthroughDecoder, TileDecoder, WorkerId, WorkerPool,
};
