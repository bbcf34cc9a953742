//! Decode dispatch layer.
//!
//! Jobs carry their tile bytes inline and run on a pool of worker execution
//! contexts, off the coordinating task:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             MbtilesSource               │
//! └────────────────────┬────────────────────┘
//!                      │ send(kind, request, target?)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         DecodeDispatcher Trait          │
//! └────────────────────┬────────────────────┘
//!                      │
//!          ┌───────────┼───────────┐
//!          ▼           ▼           ▼
//!     ┌─────────┐ ┌─────────┐ ┌─────────┐
//!     │worker-0 │ │worker-1 │ │worker-N │   (per-tile decode state)
//!     └─────────┘ └─────────┘ └─────────┘
//! ```
//!
//! - [`DecodeDispatcher`]: routing contract (pick a worker, or pin to one)
//! - [`WorkerPool`]: Tokio-backed implementation with round-robin assignment
//! - [`TileDecoder`]: parser executed by workers; [`PassthroughDecoder`] by default
//! - [`CachePolicyDecoder`]: stamps decoded tiles with `Cache-Control` expiry

mod decoder;
mod dispatcher;
mod job;
mod pool;

pub use decoder::{CachePolicyDecoder, PassthroughDecoder, TileDecoder};
pub use dispatcher::DecodeDispatcher;
pub use job::{Completion, DecodeRequest, DecodedTile, Dispatched, JobKind, WorkerId};
pub use pool::{WorkerPool, DEFAULT_WORKER_TILE_CAPACITY};
