//! Tokio-backed pool of decode workers.
//!
//! Each worker is a task with its own inbox, processing one job at a time
//! and running the decoder on the blocking pool. Workers keep private
//! per-tile decode state in an LRU, which is why reloads must be pinned to
//! the worker that performed the original load.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::tile::TileUid;

use super::decoder::TileDecoder;
use super::dispatcher::DecodeDispatcher;
use super::job::{DecodeRequest, DecodedTile, Dispatched, JobKind, WorkerId};

/// Default number of tiles whose decode state each worker retains.
pub const DEFAULT_WORKER_TILE_CAPACITY: usize = 1024;

enum WorkerMessage {
    Decode {
        kind: JobKind,
        request: DecodeRequest,
        reply: oneshot::Sender<Result<DecodedTile, DecodeError>>,
    },
    Remove {
        uid: TileUid,
    },
}

/// Private state a worker keeps for a tile it has decoded.
struct WorkerTileState {
    generation: u64,
}

struct WorkerHandle {
    inbox: mpsc::UnboundedSender<WorkerMessage>,
}

/// Pool of decode workers with round-robin assignment.
///
/// Dropping the pool closes every inbox; workers finish their current job
/// and exit, and jobs still queued resolve with
/// [`DecodeError::WorkerUnavailable`].
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    next: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) sharing `decoder`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<T: TileDecoder>(size: usize, decoder: T) -> Self {
        Self::with_capacity(size, DEFAULT_WORKER_TILE_CAPACITY, decoder)
    }

    /// Spawn workers that each retain decode state for at most
    /// `tile_capacity` tiles.
    pub fn with_capacity<T: TileDecoder>(size: usize, tile_capacity: usize, decoder: T) -> Self {
        let decoder: Arc<dyn TileDecoder> = Arc::new(decoder);
        let capacity = NonZeroUsize::new(tile_capacity).unwrap_or(NonZeroUsize::MIN);

        let workers = (0..size.max(1))
            .map(|index| {
                let (inbox, rx) = mpsc::unbounded_channel();
                tokio::spawn(run_worker(
                    WorkerId(index),
                    rx,
                    Arc::clone(&decoder),
                    capacity,
                ));
                WorkerHandle { inbox }
            })
            .collect();

        Self {
            workers,
            next: AtomicUsize::new(0),
        }
    }

    /// Number of workers in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    fn pick(&self) -> WorkerId {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        WorkerId(index)
    }
}

impl DecodeDispatcher for WorkerPool {
    fn send(&self, kind: JobKind, request: DecodeRequest, target: Option<WorkerId>) -> Dispatched {
        let worker = target.unwrap_or_else(|| self.pick());
        let (reply, completion) = oneshot::channel();

        debug!(uid = %request.uid, %kind, %worker, coord = %request.coordinate, "dispatching decode job");

        match self.workers.get(worker.0) {
            Some(handle) => {
                // A closed inbox drops the reply sender, which the caller
                // observes as an unavailable worker.
                let _ = handle.inbox.send(WorkerMessage::Decode {
                    kind,
                    request,
                    reply,
                });
            }
            None => {
                let _ = reply.send(Err(DecodeError::NoSuchWorker(worker)));
            }
        }

        Dispatched { worker, completion }
    }

    fn remove_tile(&self, worker: WorkerId, uid: TileUid) {
        if let Some(handle) = self.workers.get(worker.0) {
            let _ = handle.inbox.send(WorkerMessage::Remove { uid });
        }
    }
}

async fn run_worker(
    id: WorkerId,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    decoder: Arc<dyn TileDecoder>,
    capacity: NonZeroUsize,
) {
    let mut tiles: LruCache<TileUid, WorkerTileState> = LruCache::new(capacity);

    while let Some(message) = inbox.recv().await {
        match message {
            WorkerMessage::Decode {
                kind,
                request,
                reply,
            } => {
                let uid = request.uid;
                if kind == JobKind::Reload && !tiles.contains(&uid) {
                    warn!(%uid, worker = %id, "reload for a tile whose decode state this worker does not hold");
                    let _ = reply.send(Err(DecodeError::UnknownTile { uid }));
                    continue;
                }

                let result = decode_blocking(Arc::clone(&decoder), request).await;
                let result = result.map(|mut decoded| {
                    decoded.generation = match tiles.get_mut(&uid) {
                        Some(state) => {
                            state.generation += 1;
                            state.generation
                        }
                        None => {
                            tiles.put(uid, WorkerTileState { generation: 1 });
                            1
                        }
                    };
                    decoded
                });

                // The requester may have timed out and gone away.
                let _ = reply.send(result);
            }
            WorkerMessage::Remove { uid } => {
                tiles.pop(&uid);
            }
        }
    }

    debug!(worker = %id, "decode worker shutting down");
}

async fn decode_blocking(
    decoder: Arc<dyn TileDecoder>,
    request: DecodeRequest,
) -> Result<DecodedTile, DecodeError> {
    match tokio::task::spawn_blocking(move || decoder.decode(&request)).await {
        Ok(result) => result,
        Err(e) => Err(DecodeError::Failed(format!("decoder panicked: {}", e))),
    }
}
