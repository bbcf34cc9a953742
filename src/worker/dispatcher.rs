use crate::tile::TileUid;

use super::job::{DecodeRequest, Dispatched, JobKind, WorkerId};

/// Routes decode jobs to worker execution contexts.
///
/// Passed to the source as an explicit dependency. Implementations hold
/// routing logic only, never per-tile state.
pub trait DecodeDispatcher: Send + Sync + 'static {
    /// Submit a job.
    ///
    /// With `target == None` the dispatcher picks a worker; otherwise the job
    /// is pinned to `target`. The returned completion resolves exactly once,
    /// and never before `send` has returned.
    fn send(&self, kind: JobKind, request: DecodeRequest, target: Option<WorkerId>) -> Dispatched;

    /// Release the decode state `worker` holds for a tile. Fire-and-forget.
    fn remove_tile(&self, worker: WorkerId, uid: TileUid);
}
