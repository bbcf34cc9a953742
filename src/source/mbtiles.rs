//! Tile load orchestration over an archive and a decode dispatcher.
//!
//! # Load cycle
//!
//! ```text
//! load_tile(tile, callback)
//!   │
//!   ├─ 1. overscaling / effective zoom / TMS row      (TileCoordinate)
//!   ├─ 2. read_tile(zoom_level, tile_column, tile_row)  (TileArchive)
//!   │       └─ error ──────────────▶ callback(Err), tile untouched
//!   ├─ 3. dispatch decision under the tile lock
//!   │       Idle / Expired  ──▶ Load   (pinned once an affinity exists)
//!   │       Loaded          ──▶ Reload (pinned to the affinity)
//!   │       Loading         ──▶ fold callback into the pending slot
//!   ├─ 4. await completion                            (DecodeDispatcher)
//!   │       timeout        ──▶ callback(Timeout), keep waiting
//!   │       Reload, worker lost the state ──▶ Load on the same worker
//!   └─ 5. finalize
//!           aborted ──▶ callback(Ok), pending callbacks(Ok)
//!           error   ──▶ Loading → Idle, callback(Err)
//!           success ──▶ expiry, install, Loading → Loaded, callback(Ok)
//!           then: pending slot non-empty ──▶ follow-up load with pending
//! ```

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::archive::TileArchive;
use crate::error::{DecodeError, LoadError, TileStateError};
use crate::tile::{LoadCallback, Tile, TileState, TileStatus};
use crate::worker::{
    Completion, DecodeDispatcher, DecodeRequest, DecodedTile, Dispatched, JobKind,
};

use super::installer::{DiscardInstaller, TileInstaller};
use super::options::SourceOptions;

/// Outcome of the dispatch decision.
enum Submission {
    /// A job went out; its completion belongs to this request
    Submitted(JobKind, Dispatched, LoadCallback),
    /// A job is already in flight; the callback now sits in the pending slot
    Coalesced,
    /// The tile was aborted while its payload was being read
    Discarded(LoadCallback),
    Rejected(LoadCallback, TileStateError),
}

/// Drives tile loads from an MBTiles archive through a decode dispatcher.
///
/// Cheap to clone; clones share the archive, dispatcher and installer.
/// [`load_tile`](Self::load_tile) spawns onto the current Tokio runtime.
///
/// # Type Parameters
///
/// * `A` - The archive accessor (e.g. [`MbtilesArchive`](crate::archive::MbtilesArchive))
/// * `D` - The decode dispatcher (e.g. [`WorkerPool`](crate::worker::WorkerPool))
pub struct MbtilesSource<A, D> {
    archive: Arc<A>,
    dispatcher: Arc<D>,
    installer: Arc<dyn TileInstaller>,
    options: Arc<SourceOptions>,
    source_id: Arc<str>,
}

impl<A, D> Clone for MbtilesSource<A, D> {
    fn clone(&self) -> Self {
        Self {
            archive: Arc::clone(&self.archive),
            dispatcher: Arc::clone(&self.dispatcher),
            installer: Arc::clone(&self.installer),
            options: Arc::clone(&self.options),
            source_id: Arc::clone(&self.source_id),
        }
    }
}

impl<A, D> MbtilesSource<A, D>
where
    A: TileArchive + 'static,
    D: DecodeDispatcher,
{
    pub fn new(archive: A, dispatcher: D, options: SourceOptions) -> Self {
        Self::with_shared(Arc::new(archive), Arc::new(dispatcher), options)
    }

    /// Create a source over an archive and dispatcher shared with other
    /// components.
    pub fn with_shared(archive: Arc<A>, dispatcher: Arc<D>, options: SourceOptions) -> Self {
        let source_id: Arc<str> = Arc::from(options.source_id.as_str());
        Self {
            archive,
            dispatcher,
            installer: Arc::new(DiscardInstaller),
            options: Arc::new(options),
            source_id,
        }
    }

    /// Hand decoded buffers to `installer` instead of discarding them.
    pub fn with_installer(mut self, installer: impl TileInstaller) -> Self {
        self.installer = Arc::new(installer);
        self
    }

    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    pub fn archive(&self) -> &Arc<A> {
        &self.archive
    }

    pub fn dispatcher(&self) -> &Arc<D> {
        &self.dispatcher
    }

    /// Start loading `tile`; `callback` fires exactly once with the outcome.
    ///
    /// Returns immediately. If a job for the tile is already in flight, the
    /// request goes to the tile's single pending slot. A later request takes
    /// the slot over and the earlier one rides along with it: one follow-up
    /// job runs once the in-flight job completes, and every request folded
    /// into the slot is answered with that job's outcome.
    pub fn load_tile(&self, tile: Arc<Tile>, callback: LoadCallback) {
        self.spawn_load(tile, callback, false);
    }

    /// Load `tile` and wait for the outcome.
    ///
    /// Resolves to [`LoadError::Released`] only if the request was dropped
    /// unanswered, e.g. because the runtime shut down.
    pub async fn load(&self, tile: &Arc<Tile>) -> Result<(), LoadError> {
        let (tx, rx) = oneshot::channel();
        self.load_tile(
            Arc::clone(tile),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.unwrap_or(Err(LoadError::Released))
    }

    /// Mark `tile` as no longer wanted. In-flight work runs to completion and
    /// its result is discarded.
    pub fn abort_tile(&self, tile: &Tile) {
        tile.abort();
        debug!(uid = %tile.uid(), coord = %tile.coordinate(), "tile aborted");
    }

    /// Abort `tile` and release the decode state its worker holds for it.
    pub fn unload_tile(&self, tile: &Tile) {
        self.abort_tile(tile);
        if let Some(worker) = tile.worker_affinity() {
            self.dispatcher.remove_tile(worker, tile.uid());
        }
    }

    /// Move a loaded tile whose expiry has passed to `Expired`.
    ///
    /// Returns `true` when the tile was expired and should be loaded again.
    /// Always `false` unless the source refreshes expired tiles.
    pub fn expire_if_stale(&self, tile: &Tile, now: SystemTime) -> bool {
        if !self.options.refresh_expired_tiles {
            return false;
        }
        let mut inner = tile.lock();
        let stale = inner.expiry.is_some_and(|expiry| expiry.is_stale(now));
        if !stale {
            return false;
        }
        match inner.state.expire() {
            Ok(next) => {
                inner.state = next;
                debug!(uid = %tile.uid(), "tile data is stale");
                true
            }
            Err(_) => false,
        }
    }

    fn spawn_load(&self, tile: Arc<Tile>, callback: LoadCallback, follow_up: bool) {
        let source = self.clone();
        tokio::spawn(async move {
            source.run_load(tile, callback, follow_up).await;
        });
    }

    async fn run_load(&self, tile: Arc<Tile>, callback: LoadCallback, follow_up: bool) {
        let uid = tile.uid();
        let coordinate = tile.coordinate();

        if tile.is_aborted() {
            // Parked requests were accepted before the abort
            if follow_up {
                callback(Ok(()));
                return;
            }
            callback(Err(TileStateError::IllegalTransition {
                from: TileStatus::Aborted,
                to: TileStatus::Loading,
            }
            .into()));
            return;
        }

        let max_zoom = self.options.max_zoom;
        let overscaling = coordinate.overscaling(max_zoom);
        let key = coordinate.archive_key(max_zoom);
        tile.lock().overscaling = overscaling;

        let data = match self
            .archive
            .read_tile(key.zoom_level, key.tile_column, key.tile_row)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    %uid,
                    z = key.zoom_level,
                    x = key.tile_column,
                    y = key.tile_row,
                    archive = self.archive.identifier(),
                    error = %e,
                    "archive read failed"
                );
                callback(Err(e.into()));
                return;
            }
        };

        let request = DecodeRequest {
            uid,
            coordinate,
            zoom: key.zoom_level,
            tile_size: self.options.tile_size.saturating_mul(overscaling),
            source: Arc::clone(&self.source_id),
            pixel_ratio: self.options.pixel_ratio,
            overscaling,
            show_collision_boxes: self.options.show_collision_boxes,
            data,
        };

        let retry = request.clone();
        let (kind, dispatched, callback) = match self.submit(&tile, request, callback) {
            Submission::Submitted(kind, dispatched, callback) => (kind, dispatched, callback),
            Submission::Coalesced => return,
            Submission::Discarded(callback) => {
                callback(Ok(()));
                return;
            }
            Submission::Rejected(callback, e) => {
                callback(Err(e.into()));
                return;
            }
        };

        let (mut callback, mut result) = self.wait(&tile, dispatched.completion, callback).await;
        if kind == JobKind::Reload && lost_worker_state(&result) {
            if let Some(dispatched) = self.resubmit_as_load(&tile, retry) {
                (callback, result) = self.wait(&tile, dispatched.completion, callback).await;
            }
        }
        self.complete(tile, callback, result);
    }

    /// Decide what to do with a request whose payload is in hand.
    ///
    /// Runs entirely under the tile lock so two requests can never both
    /// submit a job.
    fn submit(&self, tile: &Tile, request: DecodeRequest, callback: LoadCallback) -> Submission {
        let uid = tile.uid();
        let mut inner = tile.lock();

        if tile.is_aborted() {
            return Submission::Discarded(callback);
        }

        let pinned = inner.worker_affinity.or(inner.state.worker());
        let (kind, target) = match inner.state {
            TileState::Loading(worker) => {
                let callback = match inner.pending_reload.take() {
                    Some(parked) => {
                        debug!(%uid, "pending reload request taken over");
                        chain(parked, callback)
                    }
                    None => callback,
                };
                inner.pending_reload = Some(callback);
                debug!(%uid, %worker, "job in flight, reload coalesced");
                return Submission::Coalesced;
            }
            TileState::Idle | TileState::Expired(_) => (JobKind::Load, pinned),
            TileState::Loaded(_) => (JobKind::Reload, pinned),
            TileState::Aborted => return Submission::Discarded(callback),
        };

        let dispatched = self.dispatcher.send(kind, request, target);
        let next = match kind {
            JobKind::Load => inner.state.begin_load(dispatched.worker),
            JobKind::Reload => inner.state.begin_reload(),
        };
        match next {
            Ok(next) => inner.state = next,
            Err(e) => return Submission::Rejected(callback, e),
        }
        inner.worker_affinity.get_or_insert(dispatched.worker);

        debug!(%uid, %kind, worker = %dispatched.worker, "decode job submitted");
        Submission::Submitted(kind, dispatched, callback)
    }

    /// Wait for a job's reply.
    ///
    /// When the decode timeout fires first, `callback` is answered with
    /// [`LoadError::Timeout`] and the wait goes on with a no-op callback, so
    /// the tile holds its in-flight slot until the worker replies.
    async fn wait(
        &self,
        tile: &Tile,
        mut completion: Completion,
        callback: LoadCallback,
    ) -> (LoadCallback, Result<DecodedTile, LoadError>) {
        let limit = match self.options.decode_timeout {
            Some(limit) => limit,
            None => return (callback, received(completion.await)),
        };

        let first = tokio::time::timeout(limit, &mut completion).await;
        match first {
            Ok(reply) => (callback, received(reply)),
            Err(_) => {
                let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                warn!(uid = %tile.uid(), after_ms, "decode timed out, job stays in flight");
                callback(Err(LoadError::Timeout { after_ms }));
                let released: LoadCallback = Box::new(|_| {});
                (released, received(completion.await))
            }
        }
    }

    /// Send a reload again as a `Load` on the same worker once that worker
    /// reports it no longer holds the tile's decode state.
    fn resubmit_as_load(&self, tile: &Tile, request: DecodeRequest) -> Option<Dispatched> {
        let inner = tile.lock();
        if tile.is_aborted() {
            return None;
        }
        match inner.state {
            TileState::Loading(worker) => {
                debug!(uid = %tile.uid(), %worker, "worker lost decode state, loading again");
                Some(self.dispatcher.send(JobKind::Load, request, Some(worker)))
            }
            _ => None,
        }
    }

    fn complete(
        &self,
        tile: Arc<Tile>,
        callback: LoadCallback,
        result: Result<DecodedTile, LoadError>,
    ) {
        let uid = tile.uid();
        let mut callback = callback;

        let (outcome, follow_up) = {
            let mut inner = tile.lock();

            if tile.is_aborted() {
                if let Some(parked) = inner.pending_reload.take() {
                    debug!(%uid, "pending reload answered for aborted tile");
                    callback = chain(callback, parked);
                }
                debug!(%uid, "result discarded for aborted tile");
                (Ok(()), None)
            } else {
                let outcome = match result {
                    Ok(decoded) => {
                        if self.options.refresh_expired_tiles {
                            inner.expiry = decoded.expiry;
                        }
                        debug!(%uid, bytes = decoded.byte_len(), generation = decoded.generation, "installing decoded tile");
                        self.installer.install(uid, tile.coordinate(), decoded);
                        match inner.state.finish_load() {
                            Ok(next) => {
                                inner.state = next;
                                Ok(())
                            }
                            Err(e) => Err(e.into()),
                        }
                    }
                    Err(e) => {
                        warn!(%uid, coord = %tile.coordinate(), error = %e, "tile load failed");
                        if let Ok(next) = inner.state.fail_load() {
                            inner.state = next;
                        }
                        Err(e)
                    }
                };
                (outcome, inner.pending_reload.take())
            }
        };

        callback(outcome);

        if let Some(pending) = follow_up {
            debug!(%uid, "servicing coalesced reload");
            self.spawn_load(tile, pending, true);
        }
    }
}

/// Answer `first` and then `second` with one outcome.
fn chain(first: LoadCallback, second: LoadCallback) -> LoadCallback {
    Box::new(move |result: Result<(), LoadError>| {
        first(result.clone());
        second(result);
    })
}

fn received(
    reply: Result<Result<DecodedTile, DecodeError>, oneshot::error::RecvError>,
) -> Result<DecodedTile, LoadError> {
    match reply {
        Ok(result) => result.map_err(LoadError::from),
        Err(_) => Err(DecodeError::WorkerUnavailable.into()),
    }
}

fn lost_worker_state(result: &Result<DecodedTile, LoadError>) -> bool {
    matches!(
        result,
        Err(LoadError::Decode(DecodeError::UnknownTile { .. }))
    )
}
