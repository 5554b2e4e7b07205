//! `GlobalId`: the process-independent identifier of a material point.
//!
//! Every point of the discretization carries one `GlobalId` for the whole run.
//! Ids are never recycled and never change when a point migrates between
//! processes, so every distributed structure in this crate is keyed by them.
//! Unlike a local index, a `GlobalId` is meaningful on every rank.
//!
//! `0` is a perfectly valid id (discretizations commonly number from zero).

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Strong handle for a point's global identifier.
///
/// # Memory layout
/// `repr(transparent)` over `u64`, so slices of ids can be cast to bytes with
/// `bytemuck` and sent over the wire without copying.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Pod,
    Zeroable,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct GlobalId(u64);

impl GlobalId {
    /// Wrap a raw identifier.
    ///
    /// ```rust
    /// # use peri_balance::topology::point::GlobalId;
    /// let g = GlobalId::new(7);
    /// assert_eq!(g.get(), 7);
    /// ```
    #[inline]
    pub const fn new(raw: u64) -> Self {
        GlobalId(raw)
    }

    /// Raw `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for GlobalId {
    #[inline]
    fn from(raw: u64) -> Self {
        GlobalId(raw)
    }
}

impl From<GlobalId> for u64 {
    #[inline]
    fn from(g: GlobalId) -> u64 {
        g.0
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalId").field(&self.0).finish()
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(feature = "mpi-support")]
unsafe impl mpi::datatype::Equivalence for GlobalId {
    type Out = <u64 as mpi::datatype::Equivalence>::Out;
    fn equivalent_datatype() -> Self::Out {
        <u64 as mpi::datatype::Equivalence>::equivalent_datatype()
    }
}

/// Collect raw ids into `GlobalId`s.
pub fn gids(raw: &[u64]) -> Vec<GlobalId> {
    raw.iter().copied().map(GlobalId::new).collect()
}
