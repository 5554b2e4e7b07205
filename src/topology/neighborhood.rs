//! Bond topology in compressed-sparse-row form.
//!
//! [`NeighborhoodData`] stores, for every owned point, the global ids of its
//! bonded neighbours. The neighbour order of a point is part of the data: the
//! `j`-th bond of point `P` keeps its index `j` across every rebalance, and
//! per-bond field values are addressed through it.
//!
//! [`ResolvedNeighborhood`] is the local-index form consumed by force
//! evaluators; it is derived from an overlap map and stamped with the epoch
//! it was resolved in.

use crate::balance_error::BalanceError;
use crate::data::block_map::BlockMap;
use crate::debug_invariants::DebugInvariants;
use crate::topology::point::GlobalId;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Anything that can hand out the neighbour list of a point.
pub trait NeighborSource {
    fn neighbors_for(&self, gid: GlobalId) -> Option<&[GlobalId]>;
}

impl<S: BuildHasher> NeighborSource for HashMap<GlobalId, Vec<GlobalId>, S> {
    fn neighbors_for(&self, gid: GlobalId) -> Option<&[GlobalId]> {
        self.get(&gid).map(Vec::as_slice)
    }
}

impl<S: BuildHasher> NeighborSource for hashbrown::HashMap<GlobalId, Vec<GlobalId>, S> {
    fn neighbors_for(&self, gid: GlobalId) -> Option<&[GlobalId]> {
        self.get(&gid).map(Vec::as_slice)
    }
}

impl NeighborSource for BTreeMap<GlobalId, Vec<GlobalId>> {
    fn neighbors_for(&self, gid: GlobalId) -> Option<&[GlobalId]> {
        self.get(&gid).map(Vec::as_slice)
    }
}

/// CSR bond lists of the owned points.
///
/// # Invariants
/// - `offsets.len() == owned_ids.len() + 1`, `offsets[0] == 0`, non-decreasing.
/// - `neighbors.len() == offsets[n]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NeighborhoodData {
    owned_ids: Vec<GlobalId>,
    offsets: Vec<usize>,
    neighbors: Vec<GlobalId>,
}

/// Incremental CSR construction, one point at a time.
#[derive(Debug, Default)]
pub struct NeighborhoodBuilder {
    data: NeighborhoodData,
}

impl NeighborhoodBuilder {
    pub fn with_capacity(points: usize, bonds: usize) -> Self {
        let mut offsets = Vec::with_capacity(points + 1);
        offsets.push(0);
        Self {
            data: NeighborhoodData {
                owned_ids: Vec::with_capacity(points),
                offsets,
                neighbors: Vec::with_capacity(bonds),
            },
        }
    }

    pub fn push(&mut self, gid: GlobalId, neighbors: &[GlobalId]) {
        if self.data.offsets.is_empty() {
            self.data.offsets.push(0);
        }
        self.data.owned_ids.push(gid);
        self.data.neighbors.extend_from_slice(neighbors);
        self.data.offsets.push(self.data.neighbors.len());
    }

    pub fn finish(mut self) -> NeighborhoodData {
        if self.data.offsets.is_empty() {
            self.data.offsets.push(0);
        }
        crate::debug_invariants!(self.data.validate_invariants(), "NeighborhoodBuilder::finish");
        self.data
    }
}

/// Continue building after the points already in `data`.
impl From<NeighborhoodData> for NeighborhoodBuilder {
    fn from(data: NeighborhoodData) -> Self {
        Self { data }
    }
}

impl NeighborhoodData {
    /// Gather the lists of `owned_ids` from `lists`, keeping neighbour order.
    ///
    /// # Errors
    /// `InconsistentMap` naming the first owned id without a list.
    pub fn build<S: NeighborSource + ?Sized>(
        rank: usize,
        owned_ids: &[GlobalId],
        lists: &S,
    ) -> Result<Self, BalanceError> {
        let mut b = NeighborhoodBuilder::with_capacity(owned_ids.len(), 0);
        for &g in owned_ids {
            let nbrs = lists
                .neighbors_for(g)
                .ok_or_else(|| BalanceError::InconsistentMap {
                    rank,
                    gid: g,
                    referenced_by: None,
                    detail: "owned point has no neighbour list".into(),
                })?;
            b.push(g, nbrs);
        }
        Ok(b.finish())
    }

    /// Adopt raw CSR arrays after validating them.
    pub fn from_csr(
        owned_ids: Vec<GlobalId>,
        offsets: Vec<usize>,
        neighbors: Vec<GlobalId>,
    ) -> Result<Self, BalanceError> {
        let data = Self {
            owned_ids,
            offsets,
            neighbors,
        };
        data.validate_invariants()?;
        Ok(data)
    }

    pub fn owned_ids(&self) -> &[GlobalId] {
        &self.owned_ids
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Flat neighbour ids of all owned points.
    pub fn neighbors(&self) -> &[GlobalId] {
        &self.neighbors
    }

    pub fn num_owned_points(&self) -> usize {
        self.owned_ids.len()
    }

    /// Length of the count-prefixed list: one count per point plus every bond.
    pub fn neighborhood_list_size(&self) -> usize {
        self.owned_ids.len() + self.neighbors.len()
    }

    pub fn num_bonds(&self) -> usize {
        self.neighbors.len()
    }

    #[inline]
    pub fn neighbors_of(&self, i: usize) -> &[GlobalId] {
        &self.neighbors[self.offsets[i]..self.offsets[i + 1]]
    }

    #[inline]
    pub fn num_neighbors(&self, i: usize) -> usize {
        self.offsets[i + 1] - self.offsets[i]
    }

    /// Index of point `i`'s first bond in a bond-map buffer.
    #[inline]
    pub fn bond_offset(&self, i: usize) -> usize {
        self.offsets[i]
    }

    /// Keep only owned points listed in `ids`, in their current order.
    pub fn restrict_to(&self, ids: &[GlobalId]) -> NeighborhoodData {
        let keep: hashbrown::HashSet<GlobalId> = ids.iter().copied().collect();
        let mut b = NeighborhoodBuilder::with_capacity(ids.len(), 0);
        for (i, &g) in self.owned_ids.iter().enumerate() {
            if keep.contains(&g) {
                b.push(g, self.neighbors_of(i));
            }
        }
        b.finish()
    }

    /// Translate every neighbour to its local index in `overlap`.
    ///
    /// # Errors
    /// `DanglingBond` if a neighbour (or owned point) is missing from `overlap`.
    pub fn resolve_local(
        &self,
        overlap: &BlockMap,
        epoch: u64,
    ) -> Result<ResolvedNeighborhood, BalanceError> {
        let rank = overlap.rank();
        let mut owned_local_ids = Vec::with_capacity(self.owned_ids.len());
        let mut neighborhood_ptr = Vec::with_capacity(self.owned_ids.len());
        let mut neighborhood_list = Vec::with_capacity(self.neighborhood_list_size());
        for (i, &p) in self.owned_ids.iter().enumerate() {
            let lid = overlap.lid(p).ok_or(BalanceError::DanglingBond {
                rank,
                point: p,
                neighbor: p,
            })?;
            owned_local_ids.push(lid);
            neighborhood_ptr.push(neighborhood_list.len());
            neighborhood_list.push(self.num_neighbors(i));
            for &n in self.neighbors_of(i) {
                let nl = overlap.lid(n).ok_or(BalanceError::DanglingBond {
                    rank,
                    point: p,
                    neighbor: n,
                })?;
                neighborhood_list.push(nl);
            }
        }
        Ok(ResolvedNeighborhood {
            epoch,
            owned_local_ids,
            neighborhood_ptr,
            neighborhood_list,
        })
    }
}

impl DebugInvariants for NeighborhoodData {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "NeighborhoodData");
    }

    fn validate_invariants(&self) -> Result<(), BalanceError> {
        let n = self.owned_ids.len();
        let bad = |detail: String| BalanceError::InconsistentMap {
            rank: 0,
            gid: self.owned_ids.first().copied().unwrap_or_default(),
            referenced_by: None,
            detail,
        };
        if self.offsets.len() != n + 1 {
            return Err(bad(format!("{} offsets for {n} points", self.offsets.len())));
        }
        if self.offsets[0] != 0 {
            return Err(bad("first offset is not zero".into()));
        }
        if let Some(i) = self.offsets.windows(2).position(|w| w[1] < w[0]) {
            return Err(BalanceError::InconsistentMap {
                rank: 0,
                gid: self.owned_ids[i],
                referenced_by: None,
                detail: "offsets decrease".into(),
            });
        }
        if self.offsets[n] != self.neighbors.len() {
            return Err(bad(format!(
                "last offset {} but {} neighbours",
                self.offsets[n],
                self.neighbors.len()
            )));
        }
        Ok(())
    }
}

/// Local-index neighbourhood in count-prefixed form.
///
/// For owned point `i`, `neighborhood_list[neighborhood_ptr[i]]` is its bond
/// count `k`, followed by the `k` overlap-map local ids of its neighbours.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedNeighborhood {
    pub epoch: u64,
    pub owned_local_ids: Vec<usize>,
    pub neighborhood_ptr: Vec<usize>,
    pub neighborhood_list: Vec<usize>,
}

impl ResolvedNeighborhood {
    pub fn num_owned_points(&self) -> usize {
        self.owned_local_ids.len()
    }

    /// Overlap local ids of point `i`'s neighbours.
    pub fn neighbors_of(&self, i: usize) -> &[usize] {
        let p = self.neighborhood_ptr[i];
        let k = self.neighborhood_list[p];
        &self.neighborhood_list[p + 1..p + 1 + k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::block_map::ElementSizes;
    use crate::topology::point::gids;

    fn g(v: u64) -> GlobalId {
        GlobalId::new(v)
    }

    #[test]
    fn build_keeps_neighbour_order() {
        let mut lists = HashMap::new();
        lists.insert(g(0), gids(&[3, 1]));
        lists.insert(g(1), gids(&[]));
        lists.insert(g(3), gids(&[0]));
        let n = NeighborhoodData::build(0, &gids(&[3, 0, 1]), &lists).unwrap();
        assert_eq!(n.neighbors_of(1), &gids(&[3, 1])[..]);
        assert_eq!(n.num_neighbors(2), 0);
        assert_eq!(n.bond_offset(2), 3);
        assert_eq!(n.neighborhood_list_size(), 6);
    }

    #[test]
    fn build_fails_on_missing_list() {
        let lists: BTreeMap<GlobalId, Vec<GlobalId>> = BTreeMap::new();
        let err = NeighborhoodData::build(2, &gids(&[5]), &lists).unwrap_err();
        assert!(matches!(err, BalanceError::InconsistentMap { rank: 2, gid, .. } if gid == g(5)));
    }

    #[test]
    fn from_csr_validates() {
        assert!(NeighborhoodData::from_csr(gids(&[1]), vec![0, 2], gids(&[2])).is_err());
        assert!(NeighborhoodData::from_csr(gids(&[1, 2]), vec![0, 2, 1], gids(&[2])).is_err());
        assert!(NeighborhoodData::from_csr(gids(&[1]), vec![1, 1], gids(&[2])).is_err());
        assert!(NeighborhoodData::from_csr(vec![], vec![0], vec![]).is_ok());
    }

    #[test]
    fn restrict_keeps_order() {
        let n = NeighborhoodData::from_csr(gids(&[1, 2, 3]), vec![0, 1, 3, 4], gids(&[2, 1, 3, 2]))
            .unwrap();
        let r = n.restrict_to(&gids(&[3, 1]));
        assert_eq!(r.owned_ids(), &gids(&[1, 3])[..]);
        assert_eq!(r.neighbors(), &gids(&[2, 2])[..]);
    }

    #[test]
    fn builder_continues_restricted_data() {
        let n = NeighborhoodData::from_csr(gids(&[1, 2]), vec![0, 1, 2], gids(&[2, 1])).unwrap();
        let mut b = NeighborhoodBuilder::from(n.restrict_to(&gids(&[2])));
        b.push(g(7), &gids(&[2, 1]));
        let out = b.finish();
        assert_eq!(out.owned_ids(), &gids(&[2, 7])[..]);
        assert_eq!(out.offsets(), &[0, 1, 3]);
    }

    #[test]
    fn resolve_is_count_prefixed() {
        let n = NeighborhoodData::from_csr(gids(&[4, 0]), vec![0, 2, 3], gids(&[0, 9, 4])).unwrap();
        let ov = BlockMap::from_parts(0, gids(&[4, 0, 9]), ElementSizes::Constant(1), 2, 3)
            .unwrap();
        let r = n.resolve_local(&ov, 3).unwrap();
        assert_eq!(r.epoch, 3);
        assert_eq!(r.owned_local_ids, vec![0, 1]);
        assert_eq!(r.neighborhood_ptr, vec![0, 3]);
        assert_eq!(r.neighborhood_list, vec![2, 1, 2, 1, 0]);
        assert_eq!(r.neighbors_of(1), &[0]);
    }

    #[test]
    fn resolve_reports_dangling_bond() {
        let n = NeighborhoodData::from_csr(gids(&[4]), vec![0, 1], gids(&[8])).unwrap();
        let ov = BlockMap::from_parts(1, gids(&[4]), ElementSizes::Constant(1), 1, 1).unwrap();
        assert_eq!(
            n.resolve_local(&ov, 0).unwrap_err(),
            BalanceError::DanglingBond {
                rank: 1,
                point: g(4),
                neighbor: g(8)
            }
        );
    }
}
