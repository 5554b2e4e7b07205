//! Owner assignments for points.
//!
//! An [`OwnerAssignment`] is what a partitioner hands back: for each point
//! the local process currently owns, the rank that should own it after the
//! next rebalance. It only ever covers locally owned ids.

use crate::topology::point::GlobalId;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OwnerAssignment {
    owners: BTreeMap<GlobalId, usize>,
}

impl OwnerAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(gid, rank)` pairs; a repeated gid keeps the last rank.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (GlobalId, usize)>,
    {
        Self {
            owners: pairs.into_iter().collect(),
        }
    }

    /// Every id in `ids` assigned to `rank`.
    pub fn all_to(ids: &[GlobalId], rank: usize) -> Self {
        Self::from_pairs(ids.iter().map(|&g| (g, rank)))
    }

    /// Insert or update the destination of `gid`.
    pub fn set(&mut self, gid: GlobalId, rank: usize) -> Option<usize> {
        self.owners.insert(gid, rank)
    }

    /// Destination rank of `gid`, if assigned.
    pub fn owner(&self, gid: GlobalId) -> Option<usize> {
        self.owners.get(&gid).copied()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Iterate `(gid, rank)` in ascending gid order.
    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, usize)> + '_ {
        self.owners.iter().map(|(&g, &r)| (g, r))
    }

    /// True when this assignment covers exactly `ids`, all mapped to `rank`.
    pub fn keeps_all(&self, ids: &[GlobalId], rank: usize) -> bool {
        self.owners.len() == ids.len() && ids.iter().all(|&g| self.owner(g) == Some(rank))
    }
}
