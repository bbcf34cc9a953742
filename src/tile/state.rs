//! Explicit tile lifecycle state machine.
//!
//! ```text
//!            begin_load                 finish_load
//!   Idle ───────────────▶ Loading(w) ───────────────▶ Loaded(w)
//!    ▲                      │   ▲                       │    │
//!    └──── fail_load ───────┘   └───── begin_reload ────┘    │ expire
//!                           │   ▲                            ▼
//!                     abort │   └──────── begin_load ──── Expired(w)
//!                           ▼                                │
//!                        Aborted ◀────────── abort ──────────┘
//! ```
//!
//! Transition functions consume the current state and return the next one,
//! or a [`TileStateError`] if the move is not allowed.

use serde::Serialize;

use crate::error::TileStateError;
use crate::worker::WorkerId;

/// Tag-only view of a [`TileState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileStatus {
    Idle,
    Loading,
    Loaded,
    Expired,
    Aborted,
}

/// Lifecycle state of one tile, carrying the worker that holds its decode
/// state where one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Idle,
    Loading(WorkerId),
    Loaded(WorkerId),
    Expired(WorkerId),
    Aborted,
}

impl TileState {
    pub fn status(&self) -> TileStatus {
        match self {
            TileState::Idle => TileStatus::Idle,
            TileState::Loading(_) => TileStatus::Loading,
            TileState::Loaded(_) => TileStatus::Loaded,
            TileState::Expired(_) => TileStatus::Expired,
            TileState::Aborted => TileStatus::Aborted,
        }
    }

    /// Worker carried by the state, if any.
    pub fn worker(&self) -> Option<WorkerId> {
        match *self {
            TileState::Loading(w) | TileState::Loaded(w) | TileState::Expired(w) => Some(w),
            TileState::Idle | TileState::Aborted => None,
        }
    }

    /// A `Load` job was submitted to `worker`.
    pub fn begin_load(self, worker: WorkerId) -> Result<Self, TileStateError> {
        match self {
            TileState::Idle | TileState::Expired(_) => Ok(TileState::Loading(worker)),
            other => Err(other.illegal(TileStatus::Loading)),
        }
    }

    /// A `Reload` job was submitted to the worker that produced the loaded data.
    pub fn begin_reload(self) -> Result<Self, TileStateError> {
        match self {
            TileState::Loaded(w) => Ok(TileState::Loading(w)),
            other => Err(other.illegal(TileStatus::Loading)),
        }
    }

    pub fn finish_load(self) -> Result<Self, TileStateError> {
        match self {
            TileState::Loading(w) => Ok(TileState::Loaded(w)),
            other => Err(other.illegal(TileStatus::Loaded)),
        }
    }

    /// The in-flight job failed; the tile becomes eligible for a fresh load.
    pub fn fail_load(self) -> Result<Self, TileStateError> {
        match self {
            TileState::Loading(_) => Ok(TileState::Idle),
            other => Err(other.illegal(TileStatus::Idle)),
        }
    }

    /// Revalidation data says the loaded data is stale.
    pub fn expire(self) -> Result<Self, TileStateError> {
        match self {
            TileState::Loaded(w) => Ok(TileState::Expired(w)),
            other => Err(other.illegal(TileStatus::Expired)),
        }
    }

    /// Only in-progress tiles (`Loading`, `Expired`) move to `Aborted`;
    /// every other state is left as is.
    pub fn abort(self) -> Self {
        match self {
            TileState::Loading(_) | TileState::Expired(_) | TileState::Aborted => {
                TileState::Aborted
            }
            other => other,
        }
    }

    fn illegal(self, to: TileStatus) -> TileStateError {
        TileStateError::IllegalTransition {
            from: self.status(),
            to,
        }
    }
}
