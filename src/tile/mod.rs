//! Tile entity layer.
//!
//! This module holds the per-tile record the source mutates while loading:
//!
//! - [`TileCoordinate`]: canonical XYZ coordinate and the TMS archive key transform
//! - [`Tile`]: one tile's load lifecycle (state, worker affinity, abort flag,
//!   pending reload slot, expiry metadata)
//! - [`TileState`]: explicit state machine with checked transitions
//! - [`ExpiryData`]: freshness metadata used in refresh-expired-tiles mode

mod coord;
mod entity;
mod expiry;
mod state;

pub use coord::{tms_row, ArchiveKey, CoordinateError, TileCoordinate, MAX_COORDINATE_ZOOM};
pub use entity::{LoadCallback, Tile, TileUid};
pub use expiry::ExpiryData;
pub use state::{TileState, TileStatus};
