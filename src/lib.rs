#![cfg_attr(docsrs, feature(doc_cfg))]
//! # peri-balance
//!
//! peri-balance keeps the distributed state of a particle (peridynamic)
//! simulation consistent while ownership of points moves between processes.
//! It provides global index maps, bond neighbourhoods, a two-state field
//! store, and a rebalance engine that migrates all of it together.
//!
//! ## Features
//! - [`BlockMap`](data::block_map::BlockMap) global index maps (owned, overlap,
//!   3-D and bond variants) built collectively from owned ids
//! - [`NeighborhoodData`](topology::neighborhood::NeighborhoodData) CSR bond
//!   lists keyed by global id, resolved to local ids once per epoch
//! - [`DataManager`](data::data_manager::DataManager) field storage with
//!   `N`/`Np1` states and ghost refresh
//! - [`RebalanceEngine`](engine::RebalanceEngine) with pluggable
//!   [`Partitioner`](partitioning::Partitioner)s and a checked migration
//!   pipeline
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! peri-balance = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "rayon", "check-invariants"]
//! ```
//!
//! ## Determinism
//!
//! Every collective is lock-step: all processes issue the same exchanges in
//! the same order, partitioners break ties by global id, and new local orders
//! are `kept ++ imports` with imports ascending. Two runs with the same input
//! produce identical layouts.

pub mod algs;
pub mod balance_error;
pub mod data;
pub mod debug_invariants;
pub mod engine;
pub mod partitioning;
pub mod topology;

pub use balance_error::BalanceError;
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm, TagSequence};
    pub use crate::balance_error::BalanceError;
    pub use crate::data::block_map::BlockMap;
    pub use crate::data::data_manager::DataManager;
    pub use crate::data::field::{FieldKind, FieldScope, FieldSpec, Step, Temporal, well_known};
    pub use crate::data::mothership::MothershipVector;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::engine::{
        EngineState, LocalDiscretization, RebalanceConfig, RebalanceEngine, RebalanceReport,
    };
    pub use crate::partitioning::{
        CoordinateBisection, ExplicitAssignment, KeepCurrent, Partitioner,
    };
    pub use crate::topology::neighborhood::NeighborhoodData;
    pub use crate::topology::ownership::OwnerAssignment;
    pub use crate::topology::point::GlobalId;
}
