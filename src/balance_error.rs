//! BalanceError: unified error type for peri-balance public APIs.
//!
//! Every invariant the ownership engine relies on has its own variant, and
//! each variant carries the offending global id(s) and rank so a failing run
//! reports *which* point broke *which* rule. None of these errors is retried:
//! the distributed invariants (id uniqueness, bond completeness) have no
//! partial state to continue from.

use crate::data::field::Step;
use crate::engine::EngineState;
use crate::topology::point::GlobalId;
use thiserror::Error;

/// Unified error type for peri-balance operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BalanceError {
    /// Malformed element size, or an empty global id set at map construction.
    #[error("invalid size on rank {rank}: {detail}")]
    InvalidSize { rank: usize, detail: String },

    /// A map or neighbourhood refers to an id it cannot account for.
    #[error("inconsistent map on rank {rank}: gid {gid} {detail}")]
    InconsistentMap {
        rank: usize,
        gid: GlobalId,
        /// Owned point whose neighbour list referenced `gid`, if any.
        referenced_by: Option<GlobalId>,
        detail: String,
    },

    /// A time state was requested that the field does not carry.
    #[error("field `{field}` has no {step:?} state")]
    InvalidState { field: String, step: Step },

    /// No field with this name is registered.
    #[error("unknown field `{0}`")]
    UnknownField(String),

    /// A field was registered twice with different specifications.
    #[error("field `{0}` is already registered with a different specification")]
    DuplicateField(String),

    /// The migration plan does not partition the global id set exactly once.
    #[error("partition integrity violated on rank {rank}: {detail} (gids {gids:?})")]
    PartitionIntegrity {
        rank: usize,
        gids: Vec<GlobalId>,
        detail: String,
    },

    /// After rebuilding, a bond points at an id missing from the overlap map.
    #[error("dangling bond on rank {rank}: point {point} -> neighbour {neighbor}")]
    DanglingBond {
        rank: usize,
        point: GlobalId,
        neighbor: GlobalId,
    },

    /// A point-to-point exchange with `neighbor` failed.
    #[error("communication error with rank {neighbor}: {message}")]
    CommError { neighbor: usize, message: String },

    /// A received buffer did not have the announced length.
    #[error("buffer size mismatch from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },

    /// A migration record stream could not be decoded.
    #[error("malformed wire data from rank {neighbor}: {detail}")]
    WireFormat { neighbor: usize, detail: String },

    /// Caller-supplied arrays disagree in length.
    #[error("length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    /// The partitioning oracle failed.
    #[error("partitioner failed on rank {rank}: {detail}")]
    Partitioner { rank: usize, detail: String },

    /// A previous rebalance failed; the engine must not be used again.
    #[error("engine on rank {rank} is unusable after a failed rebalance")]
    EngineUnusable { rank: usize },

    /// An engine operation was attempted from the wrong state.
    #[error("invalid engine transition {from:?} -> {to:?}")]
    InvalidTransition { from: EngineState, to: EngineState },
}

impl BalanceError {
    /// Build a [`BalanceError::PartitionIntegrity`] for a single rank.
    pub fn integrity(rank: usize, gids: Vec<GlobalId>, detail: impl Into<String>) -> Self {
        BalanceError::PartitionIntegrity {
            rank,
            gids,
            detail: detail.into(),
        }
    }

    /// Whether this error leaves the distributed state torn.
    ///
    /// Contract violations on a single rank (unknown field, wrong state) are
    /// not fatal; anything touching the partition is.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BalanceError::UnknownField(_)
                | BalanceError::InvalidState { .. }
                | BalanceError::DuplicateField(_)
                | BalanceError::LengthMismatch { .. }
        )
    }
}
