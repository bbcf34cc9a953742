use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::DecodeError;
use crate::tile::{ExpiryData, TileCoordinate, TileUid};

/// Identity of one worker execution context in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Kind of decode job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// First parse of a tile (or a re-parse after expiry / failure)
    Load,
    /// Re-parse on the worker that holds the tile's previous parse state
    Reload,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Load => f.write_str("load"),
            JobKind::Reload => f.write_str("reload"),
        }
    }
}

/// Self-contained decode job: the tile bytes travel inside the request.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub uid: TileUid,

    /// Canonical coordinate being loaded
    pub coordinate: TileCoordinate,

    /// Zoom level the payload was read from
    pub zoom: u8,

    /// Base tile size multiplied by the overscaling factor
    pub tile_size: u32,

    /// Identifier of the source issuing the job
    pub source: Arc<str>,

    pub pixel_ratio: f32,
    pub overscaling: u32,

    /// Renderer debug flag
    pub show_collision_boxes: bool,

    /// Decompressed tile payload
    pub data: Bytes,
}

/// Parsed buffers returned by a worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedTile {
    pub buffers: Vec<Bytes>,

    /// Freshness metadata reported alongside the payload, if any
    pub expiry: Option<ExpiryData>,

    /// Number of successful decodes the worker has performed for this tile,
    /// this one included
    pub generation: u64,
}

impl DecodedTile {
    pub fn new(buffers: Vec<Bytes>) -> Self {
        Self {
            buffers,
            expiry: None,
            generation: 0,
        }
    }

    pub fn with_expiry(mut self, expiry: ExpiryData) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Total size of all buffers in bytes.
    pub fn byte_len(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }
}

/// Single-fire completion channel for one decode job.
pub type Completion = oneshot::Receiver<Result<DecodedTile, DecodeError>>;

/// Result of submitting a job: where it went and how to await it.
#[derive(Debug)]
pub struct Dispatched {
    pub worker: WorkerId,
    pub completion: Completion,
}
