//! Point identity, ownership and bond topology.
//!
//! - [`point::GlobalId`]: the process-independent name of a point
//! - [`ownership::OwnerAssignment`]: which rank should own which point
//! - [`neighborhood::NeighborhoodData`]: CSR bond lists in global ids

pub mod neighborhood;
pub mod ownership;
pub mod point;

pub use neighborhood::{NeighborhoodData, ResolvedNeighborhood};
pub use point::GlobalId;
