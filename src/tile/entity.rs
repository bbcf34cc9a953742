//! The mutable record tracking one tile's load lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{LoadError, TileStateError};
use crate::worker::WorkerId;

use super::coord::TileCoordinate;
use super::expiry::ExpiryData;
use super::state::{TileState, TileStatus};

/// Completion callback for a tile load request. Invoked exactly once.
pub type LoadCallback = Box<dyn FnOnce(Result<(), LoadError>) + Send + 'static>;

static NEXT_TILE_UID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier, unique per [`Tile`] instance in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileUid(u64);

impl TileUid {
    fn next() -> Self {
        TileUid(NEXT_TILE_UID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TileUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tile's current load attempt.
///
/// The owning caller creates the tile, may [`abort`](Tile::abort) or
/// [`mark_expired`](Tile::mark_expired) it, and reads its status. All other
/// mutation belongs to the source driving its loads. The internal lock is
/// never held across a suspension point.
pub struct Tile {
    uid: TileUid,
    coordinate: TileCoordinate,
    aborted: AtomicBool,
    inner: Mutex<TileInner>,
}

pub(crate) struct TileInner {
    pub(crate) state: TileState,
    pub(crate) worker_affinity: Option<WorkerId>,
    pub(crate) pending_reload: Option<LoadCallback>,
    pub(crate) expiry: Option<ExpiryData>,
    pub(crate) overscaling: u32,
}

impl Tile {
    pub fn new(coordinate: TileCoordinate) -> Self {
        Self {
            uid: TileUid::next(),
            coordinate,
            aborted: AtomicBool::new(false),
            inner: Mutex::new(TileInner {
                state: TileState::Idle,
                worker_affinity: None,
                pending_reload: None,
                expiry: None,
                overscaling: 1,
            }),
        }
    }

    pub fn uid(&self) -> TileUid {
        self.uid
    }

    pub fn coordinate(&self) -> TileCoordinate {
        self.coordinate
    }

    pub fn state(&self) -> TileState {
        self.lock().state
    }

    pub fn status(&self) -> TileStatus {
        self.lock().state.status()
    }

    /// Worker recorded at first dispatch. Never changes afterwards.
    pub fn worker_affinity(&self) -> Option<WorkerId> {
        self.lock().worker_affinity
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn has_pending_reload(&self) -> bool {
        self.lock().pending_reload.is_some()
    }

    pub fn expiry(&self) -> Option<ExpiryData> {
        self.lock().expiry
    }

    /// Overscaling factor computed by the most recent load request.
    pub fn overscaling(&self) -> u32 {
        self.lock().overscaling
    }

    /// Mark the tile as no longer wanted.
    ///
    /// In-flight work is not cancelled; its eventual result is discarded and
    /// the request's callback still fires once. Safe to call at any time.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        let mut inner = self.lock();
        inner.state = inner.state.abort();
    }

    /// Flag loaded data as stale so the next load re-fetches it.
    pub fn mark_expired(&self) -> Result<(), TileStateError> {
        let mut inner = self.lock();
        inner.state = inner.state.expire()?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TileInner> {
        // Transitions are single assignments, so a poisoned record is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Tile")
            .field("uid", &self.uid)
            .field("coordinate", &self.coordinate)
            .field("state", &inner.state)
            .field("worker_affinity", &inner.worker_affinity)
            .field("aborted", &self.is_aborted())
            .field("pending_reload", &inner.pending_reload.is_some())
            .finish()
    }
}
