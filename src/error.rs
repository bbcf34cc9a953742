use thiserror::Error;

use crate::tile::{TileStatus, TileUid};
use crate::worker::WorkerId;

/// Errors raised by the archive accessor.
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    /// The archive could not be opened (missing database capability, bad
    /// path, not an MBTiles file). Permanent for the handle.
    #[error("Archive unavailable: {0}")]
    Unavailable(String),

    /// No row exists for the requested key
    #[error("Tile {z},{x},{y} not found")]
    NotFound { z: u8, x: u32, y: u32 },

    /// Storage-layer fault on a single read
    #[error("Query error: {0}")]
    Query(String),
}

/// Errors reported by a decode worker.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The payload handed to the worker was empty
    #[error("empty data")]
    Empty,

    /// A reload landed on a worker that holds no state for the tile
    #[error("Worker holds no decode state for tile {uid}")]
    UnknownTile { uid: TileUid },

    /// The job targeted a worker the pool does not have
    #[error("No such worker: {0}")]
    NoSuchWorker(WorkerId),

    /// The worker went away before replying
    #[error("Worker unavailable")]
    WorkerUnavailable,

    /// Parser failure
    #[error("Decode failed: {0}")]
    Failed(String),
}

/// Rejected tile state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileStateError {
    #[error("Illegal tile transition from {from:?} to {to:?}")]
    IllegalTransition { from: TileStatus, to: TileStatus },
}

/// Errors delivered to a `load_tile` callback.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    State(#[from] TileStateError),

    /// The decode job did not complete within the configured timeout
    #[error("Decode timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The request was dropped without ever being answered
    #[error("Load request released without a result")]
    Released,
}

impl LoadError {
    /// Whether re-issuing the same load can reasonably succeed.
    ///
    /// `NotFound` only resolves if the archive content changes, and an
    /// unavailable archive never recovers for the same handle.
    pub fn is_retryable(&self) -> bool {
        match self {
            LoadError::Archive(ArchiveError::Query(_)) => true,
            LoadError::Archive(_) => false,
            LoadError::Decode(DecodeError::Empty) => false,
            LoadError::Decode(_) => true,
            LoadError::Timeout { .. } => true,
            LoadError::State(_) | LoadError::Released => false,
        }
    }
}
