use std::time::Duration;

/// Default base tile size in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Max zoom assumed when neither the caller nor the archive says otherwise.
pub const DEFAULT_MAX_ZOOM: u8 = 22;

/// Default source identifier attached to decode jobs.
pub const DEFAULT_SOURCE_ID: &str = "mbtiles";

/// Per-source settings for [`MbtilesSource`](super::MbtilesSource).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    /// Identifier passed to workers with every job
    pub source_id: String,

    /// Deepest zoom stored in the archive; deeper requests are overscaled
    pub max_zoom: u8,

    /// Base tile size, multiplied by the overscaling factor per request
    pub tile_size: u32,

    pub pixel_ratio: f32,

    /// Store expiry metadata reported by decodes on the tile
    pub refresh_expired_tiles: bool,

    /// Renderer debug flag forwarded to workers
    pub show_collision_boxes: bool,

    /// Stop waiting for a decode job after this long and fail the request
    /// with [`LoadError::Timeout`](crate::error::LoadError::Timeout).
    ///
    /// The job itself keeps its slot: the tile stays `Loading` until the
    /// worker replies, so a late result is still installed and later
    /// requests coalesce behind it. `None` waits forever.
    pub decode_timeout: Option<Duration>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            source_id: DEFAULT_SOURCE_ID.to_string(),
            max_zoom: DEFAULT_MAX_ZOOM,
            tile_size: DEFAULT_TILE_SIZE,
            pixel_ratio: 1.0,
            refresh_expired_tiles: false,
            show_collision_boxes: false,
            decode_timeout: None,
        }
    }
}
