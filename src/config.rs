//! Configuration management for the MBTiles pipeline.
//!
//! This module provides the CLI for the `mbtiles-pipeline` binary:
//! - Command-line arguments via clap
//! - Environment variables with `MBT_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use mbtiles_pipeline::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.into_command() {
//!     Command::Load(config) => println!("Loading from {}", config.archive.display()),
//!     Command::Inspect(config) => println!("Inspecting {}", config.archive.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `MBT_ARCHIVE` - Path to the MBTiles archive (required)
//! - `MBT_MAX_ZOOM` - Deepest zoom stored in the archive (default: archive metadata, else 22)
//! - `MBT_TILE_SIZE` - Base tile size in pixels (default: 512)
//! - `MBT_WORKERS` - Number of decode workers (default: available parallelism)
//! - `MBT_WORKER_TILE_CAPACITY` - Tiles whose decode state each worker retains (default: 1024)
//! - `MBT_PIXEL_RATIO` - Device pixel ratio (default: 1.0)
//! - `MBT_REFRESH_EXPIRED_TILES` - Track expiry metadata on loaded tiles (default: false)
//! - `MBT_CACHE_CONTROL` - `Cache-Control` policy stamped on decoded tiles (e.g. `max-age=300`)
//! - `MBT_SHOW_COLLISION_BOXES` - Ask workers for collision debug boxes (default: false)
//! - `MBT_DECODE_TIMEOUT_MS` - Stop waiting for a decode job after this many milliseconds
//! - `MBT_SOURCE_ID` - Source identifier attached to decode jobs (default: mbtiles)
//! - `MBT_REPEAT` - Back-to-back load requests per tile (default: 1)
//! - `MBT_VERBOSE` - Debug-level logging (default: false)

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand};

use crate::source::{SourceOptions, DEFAULT_MAX_ZOOM, DEFAULT_SOURCE_ID, DEFAULT_TILE_SIZE};
use crate::tile::{ExpiryData, TileCoordinate, MAX_COORDINATE_ZOOM};
use crate::worker::DEFAULT_WORKER_TILE_CAPACITY;

// =============================================================================
// Default Values
// =============================================================================

/// Smallest accepted base tile size.
pub const MIN_TILE_SIZE: u32 = 64;

/// Largest accepted base tile size.
pub const MAX_TILE_SIZE: u32 = 4096;

/// Default number of back-to-back requests issued per tile.
pub const DEFAULT_REPEAT: usize = 1;

/// Worker count used when none is configured.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// MBTiles pipeline - load vector tiles from an MBTiles archive through a
/// pool of decode workers.
#[derive(Parser, Debug, Clone)]
#[command(name = "mbtiles-pipeline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load tiles through the acquisition and decode pipeline
    Load(LoadConfig),

    /// Print the archive's metadata as JSON
    Inspect(InspectConfig),
}

/// Options for the `load` command.
#[derive(Args, Debug, Clone)]
pub struct LoadConfig {
    // =========================================================================
    // Archive Configuration
    // =========================================================================
    /// Path to the MBTiles archive.
    #[arg(long, env = "MBT_ARCHIVE")]
    pub archive: PathBuf,

    /// Deepest zoom stored in the archive. Deeper tiles are overscaled.
    ///
    /// Defaults to the archive's `maxzoom` metadata, or 22 if absent.
    #[arg(long, env = "MBT_MAX_ZOOM")]
    pub max_zoom: Option<u8>,

    // =========================================================================
    // Decode Configuration
    // =========================================================================
    /// Base tile size in pixels (power of two).
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "MBT_TILE_SIZE")]
    pub tile_size: u32,

    /// Number of decode workers.
    ///
    /// Defaults to the available parallelism of the host.
    #[arg(long, env = "MBT_WORKERS")]
    pub workers: Option<usize>,

    /// Number of tiles whose decode state each worker retains.
    #[arg(long, default_value_t = DEFAULT_WORKER_TILE_CAPACITY, env = "MBT_WORKER_TILE_CAPACITY")]
    pub worker_tile_capacity: usize,

    /// Device pixel ratio forwarded to workers.
    #[arg(long, default_value_t = 1.0, env = "MBT_PIXEL_RATIO")]
    pub pixel_ratio: f32,

    /// Track expiry metadata on loaded tiles.
    #[arg(long, default_value_t = false, env = "MBT_REFRESH_EXPIRED_TILES")]
    pub refresh_expired_tiles: bool,

    /// `Cache-Control` policy whose `max-age` sets the expiry of every
    /// decoded tile. Only takes effect with `--refresh-expired-tiles`.
    #[arg(long, env = "MBT_CACHE_CONTROL")]
    pub cache_control: Option<String>,

    /// Ask workers to emit collision debug boxes.
    #[arg(long, default_value_t = false, env = "MBT_SHOW_COLLISION_BOXES")]
    pub show_collision_boxes: bool,

    /// Stop waiting for a decode job after this many milliseconds. The tile
    /// stays in flight until the worker replies.
    #[arg(long, env = "MBT_DECODE_TIMEOUT_MS")]
    pub decode_timeout_ms: Option<u64>,

    /// Source identifier attached to decode jobs.
    #[arg(long, default_value = DEFAULT_SOURCE_ID, env = "MBT_SOURCE_ID")]
    pub source_id: String,

    // =========================================================================
    // Request Configuration
    // =========================================================================
    /// Back-to-back load requests issued per tile. Requests beyond the first
    /// coalesce into at most one reload.
    #[arg(long, default_value_t = DEFAULT_REPEAT, env = "MBT_REPEAT")]
    pub repeat: usize,

    /// Tiles to load, as `z/x/y` in XYZ order.
    #[arg(required = true)]
    pub tiles: Vec<TileCoordinate>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, env = "MBT_VERBOSE")]
    pub verbose: bool,
}

impl LoadConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.archive.as_os_str().is_empty() {
            return Err("Archive path is required. Set --archive or MBT_ARCHIVE".to_string());
        }

        if let Some(max_zoom) = self.max_zoom {
            if max_zoom > MAX_COORDINATE_ZOOM {
                return Err(format!(
                    "max_zoom must be at most {}",
                    MAX_COORDINATE_ZOOM
                ));
            }
        }

        if !self.tile_size.is_power_of_two()
            || self.tile_size < MIN_TILE_SIZE
            || self.tile_size > MAX_TILE_SIZE
        {
            return Err(format!(
                "tile_size must be a power of two between {} and {}",
                MIN_TILE_SIZE, MAX_TILE_SIZE
            ));
        }

        if self.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        if self.worker_tile_capacity == 0 {
            return Err("worker_tile_capacity must be greater than 0".to_string());
        }

        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            return Err("pixel_ratio must be a positive number".to_string());
        }

        if let Some(policy) = &self.cache_control {
            let parsed = ExpiryData::from_cache_control(Some(policy.as_str()), None, UNIX_EPOCH);
            if parsed.expires_at.is_none() {
                return Err(format!(
                    "cache_control '{}' has no max-age directive",
                    policy
                ));
            }
        }

        if self.decode_timeout_ms == Some(0) {
            return Err("decode_timeout_ms must be greater than 0".to_string());
        }

        if self.repeat == 0 {
            return Err("repeat must be greater than 0".to_string());
        }

        if self.tiles.is_empty() {
            return Err("At least one tile (z/x/y) is required".to_string());
        }

        Ok(())
    }

    /// Number of decode workers to spawn.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count)
    }

    /// Build source options, falling back to `archive_max_zoom` and then
    /// [`DEFAULT_MAX_ZOOM`] when no max zoom was configured.
    pub fn source_options(&self, archive_max_zoom: Option<u8>) -> SourceOptions {
        SourceOptions {
            source_id: self.source_id.clone(),
            max_zoom: self
                .max_zoom
                .or(archive_max_zoom)
                .unwrap_or(DEFAULT_MAX_ZOOM)
                .min(MAX_COORDINATE_ZOOM),
            tile_size: self.tile_size,
            pixel_ratio: self.pixel_ratio,
            refresh_expired_tiles: self.refresh_expired_tiles,
            show_collision_boxes: self.show_collision_boxes,
            decode_timeout: self.decode_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Options for the `inspect` command.
#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// Path to the MBTiles archive.
    #[arg(long, env = "MBT_ARCHIVE")]
    pub archive: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false, env = "MBT_VERBOSE")]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
