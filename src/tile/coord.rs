//! Tile coordinates and the archive key transform.
//!
//! Canonical coordinates use the XYZ scheme (row 0 at the top). MBTiles
//! archives store rows in TMS order, so every archive read goes through
//! [`TileCoordinate::archive_key`], never the raw `y`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deepest zoom level a coordinate may address.
///
/// Keeps `2^z` representable in a `u32` tile index.
pub const MAX_COORDINATE_ZOOM: u8 = 30;

/// Errors constructing or parsing a [`TileCoordinate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    #[error("Zoom {z} exceeds the maximum of {max}", max = MAX_COORDINATE_ZOOM)]
    ZoomTooDeep { z: u8 },

    #[error("Tile {x},{y} is outside the grid at zoom {z}")]
    OutOfRange { z: u8, x: u32, y: u32 },

    #[error("Invalid tile coordinate '{0}': expected z/x/y")]
    Parse(String),
}

/// Canonical tile coordinate in the XYZ scheme.
///
/// Always inside the grid for its zoom: fields are private and every
/// constructor, deserialization included, goes through [`TileCoordinate::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct TileCoordinate {
    z: u8,
    x: u32,
    y: u32,
}

/// Unchecked wire form of a [`TileCoordinate`].
#[derive(Deserialize)]
struct RawCoordinate {
    z: u8,
    x: u32,
    y: u32,
}

impl TryFrom<RawCoordinate> for TileCoordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.z, raw.x, raw.y)
    }
}

/// Row key of a tile in the archive's `tiles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub zoom_level: u8,
    pub tile_column: u32,
    pub tile_row: u32,
}

impl TileCoordinate {
    /// Create a coordinate, checking it lies inside the grid for its zoom.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self, CoordinateError> {
        if z > MAX_COORDINATE_ZOOM {
            return Err(CoordinateError::ZoomTooDeep { z });
        }
        let dim = 1u64 << z;
        if u64::from(x) >= dim || u64::from(y) >= dim {
            return Err(CoordinateError::OutOfRange { z, x, y });
        }
        Ok(Self { z, x, y })
    }

    pub fn z(&self) -> u8 {
        self.z
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Factor by which a tile at `max_zoom` is stretched to cover this one.
    ///
    /// `2^(z - max_zoom)` above the archive's deepest level, `1` otherwise.
    pub fn overscaling(&self, max_zoom: u8) -> u32 {
        1u32 << self.z.saturating_sub(max_zoom)
    }

    /// Zoom level actually read from the archive.
    pub fn effective_zoom(&self, max_zoom: u8) -> u8 {
        self.z.min(max_zoom)
    }

    /// Key of the archive row backing this coordinate.
    ///
    /// Overscaled coordinates resolve to their ancestor at `max_zoom`, so the
    /// column and row stay inside the archive's grid.
    pub fn archive_key(&self, max_zoom: u8) -> ArchiveKey {
        let zoom_level = self.effective_zoom(max_zoom);
        let shift = self.z - zoom_level;
        let column = self.x >> shift;
        let row = self.y >> shift;
        // row < 2^zoom_level <= 2^MAX_COORDINATE_ZOOM
        ArchiveKey {
            zoom_level,
            tile_column: column,
            tile_row: (1u32 << zoom_level) - 1 - row,
        }
    }
}

/// Flip an XYZ row into TMS order: `2^z - y - 1`.
///
/// The flip is its own inverse. `None` when `y` is outside the grid at `z`.
pub fn tms_row(z: u8, y: u32) -> Option<u32> {
    if z > MAX_COORDINATE_ZOOM {
        return None;
    }
    let dim = 1u32 << z;
    dim.checked_sub(y)?.checked_sub(1)
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl FromStr for TileCoordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || CoordinateError::Parse(s.to_string());
        let mut parts = s.trim().split('/');
        let z = parts.next().ok_or_else(parse_err)?;
        let x = parts.next().ok_or_else(parse_err)?;
        let y = parts.next().ok_or_else(parse_err)?;
        if parts.next().is_some() {
            return Err(parse_err());
        }
        let z = z.parse::<u8>().map_err(|_| parse_err())?;
        let x = x.parse::<u32>().map_err(|_| parse_err())?;
        let y = y.parse::<u32>().map_err(|_| parse_err())?;
        Self::new(z, x, y)
    }
}
