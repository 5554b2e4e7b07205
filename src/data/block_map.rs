//! `BlockMap`: ordered global ids with per-element sizes.
//!
//! A `BlockMap` is the layout contract every field buffer is sized against.
//! Local index `lid` addresses the `lid`-th element; the element's data lives
//! at `first_point_in_element(lid) .. + element_size(lid)` in a conforming
//! buffer, and a conforming buffer has exactly `num_my_points()` entries.
//!
//! Owned maps list every id on exactly one rank. Overlap maps put the owned
//! ids first, in owned order, followed by ghost ids. Maps are immutable; a
//! rebalance replaces them wholesale.
//!
//! Collective construction lives in [`crate::data::global_index`].

use crate::balance_error::BalanceError;
use crate::debug_invariants::DebugInvariants;
use crate::topology::neighborhood::NeighborhoodData;
use crate::topology::point::GlobalId;
use hashbrown::HashMap;

/// Element sizes of a map: one size for all elements, or one per element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementSizes {
    Constant(usize),
    /// `offsets.len() == sizes.len() + 1`, `offsets[0] == 0`.
    Variable { sizes: Vec<usize>, offsets: Vec<usize> },
}

impl ElementSizes {
    /// Per-element sizes with precomputed prefix offsets.
    pub fn variable(sizes: Vec<usize>) -> Self {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        let mut acc = 0usize;
        offsets.push(0);
        for &s in &sizes {
            acc += s;
            offsets.push(acc);
        }
        ElementSizes::Variable { sizes, offsets }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockMap {
    rank: usize,
    gids: Vec<GlobalId>,
    sizes: ElementSizes,
    lookup: HashMap<GlobalId, usize>,
    /// Leading elements owned by `rank`; equals `gids.len()` for owned maps.
    num_owned: usize,
    /// Sum of element counts over all ranks, fixed at construction.
    num_global_elements: u64,
}

impl BlockMap {
    /// Assemble a map from already-agreed parts (no communication).
    ///
    /// # Errors
    /// `InvalidSize` for a zero constant element size or a size vector of
    /// the wrong length; `InconsistentMap` if an id is listed twice.
    pub fn from_parts(
        rank: usize,
        gids: Vec<GlobalId>,
        sizes: ElementSizes,
        num_owned: usize,
        num_global_elements: u64,
    ) -> Result<Self, BalanceError> {
        match &sizes {
            ElementSizes::Constant(0) => {
                return Err(BalanceError::InvalidSize {
                    rank,
                    detail: "element size must be positive".into(),
                });
            }
            ElementSizes::Variable { sizes: s, .. } if s.len() != gids.len() => {
                return Err(BalanceError::InvalidSize {
                    rank,
                    detail: format!("{} element sizes for {} elements", s.len(), gids.len()),
                });
            }
            _ => {}
        }
        if num_owned > gids.len() {
            return Err(BalanceError::InvalidSize {
                rank,
                detail: format!("{num_owned} owned elements in a map of {}", gids.len()),
            });
        }
        let mut lookup = HashMap::with_capacity(gids.len());
        for (lid, &g) in gids.iter().enumerate() {
            if lookup.insert(g, lid).is_some() {
                return Err(BalanceError::InconsistentMap {
                    rank,
                    gid: g,
                    referenced_by: None,
                    detail: "listed twice in one map".into(),
                });
            }
        }
        let map = Self {
            rank,
            gids,
            sizes,
            lookup,
            num_owned,
            num_global_elements,
        };
        crate::debug_invariants!(map.validate_invariants(), "BlockMap::from_parts");
        Ok(map)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Local index of `gid`, if present.
    #[inline]
    pub fn lid(&self, gid: GlobalId) -> Option<usize> {
        self.lookup.get(&gid).copied()
    }

    /// Global id at local index `lid`.
    #[inline]
    pub fn gid(&self, lid: usize) -> Option<GlobalId> {
        self.gids.get(lid).copied()
    }

    pub fn contains(&self, gid: GlobalId) -> bool {
        self.lookup.contains_key(&gid)
    }

    /// All ids in local order.
    pub fn global_ids(&self) -> &[GlobalId] {
        &self.gids
    }

    /// The owned prefix of the id list.
    pub fn owned_ids(&self) -> &[GlobalId] {
        &self.gids[..self.num_owned]
    }

    /// Ghost ids, in the order they were discovered.
    pub fn ghost_ids(&self) -> &[GlobalId] {
        &self.gids[self.num_owned..]
    }

    pub fn num_my_elements(&self) -> usize {
        self.gids.len()
    }

    pub fn num_owned_elements(&self) -> usize {
        self.num_owned
    }

    pub fn num_global_elements(&self) -> u64 {
        self.num_global_elements
    }

    /// `Some(size)` if every element has the same size.
    pub fn constant_element_size(&self) -> Option<usize> {
        match self.sizes {
            ElementSizes::Constant(s) => Some(s),
            ElementSizes::Variable { .. } => None,
        }
    }

    pub fn element_sizes(&self) -> &ElementSizes {
        &self.sizes
    }

    #[inline]
    pub fn element_size(&self, lid: usize) -> usize {
        match &self.sizes {
            ElementSizes::Constant(s) => *s,
            ElementSizes::Variable { sizes, .. } => sizes[lid],
        }
    }

    /// Offset of element `lid` in a conforming buffer.
    #[inline]
    pub fn first_point_in_element(&self, lid: usize) -> usize {
        match &self.sizes {
            ElementSizes::Constant(s) => lid * s,
            ElementSizes::Variable { offsets, .. } => offsets[lid],
        }
    }

    /// Length of a conforming buffer.
    pub fn num_my_points(&self) -> usize {
        match &self.sizes {
            ElementSizes::Constant(s) => self.gids.len() * s,
            ElementSizes::Variable { offsets, .. } => offsets.last().copied().unwrap_or(0),
        }
    }

    /// Length of the owned prefix of a conforming buffer.
    pub fn num_owned_points(&self) -> usize {
        self.first_point_in_element(self.num_owned)
    }

    /// Slice of a conforming buffer belonging to `lid`.
    #[inline]
    pub fn element_range(&self, lid: usize) -> std::ops::Range<usize> {
        let start = self.first_point_in_element(lid);
        start..start + self.element_size(lid)
    }

    /// Same ids, same order, element size 3.
    pub fn three_dimensional(&self) -> BlockMap {
        BlockMap {
            rank: self.rank,
            gids: self.gids.clone(),
            sizes: ElementSizes::Constant(3),
            lookup: self.lookup.clone(),
            num_owned: self.num_owned,
            num_global_elements: self.num_global_elements,
        }
    }

    /// Variable-size map over the owned ids whose element sizes are the
    /// neighbour counts of `nbhd`.
    ///
    /// `self` must be the owned map `nbhd` was built against.
    pub fn bond_map(&self, nbhd: &NeighborhoodData) -> Result<BlockMap, BalanceError> {
        if self.owned_ids() != nbhd.owned_ids() {
            let gid = self
                .owned_ids()
                .iter()
                .zip(nbhd.owned_ids())
                .find(|(a, b)| a != b)
                .map(|(a, _)| *a)
                .or_else(|| self.owned_ids().first().copied())
                .unwrap_or_default();
            return Err(BalanceError::InconsistentMap {
                rank: self.rank,
                gid,
                referenced_by: None,
                detail: "neighbourhood owned ids differ from the owned map".into(),
            });
        }
        let sizes = (0..nbhd.num_owned_points())
            .map(|i| nbhd.num_neighbors(i))
            .collect();
        let owned = self.owned_ids().to_vec();
        let n = owned.len();
        BlockMap::from_parts(
            self.rank,
            owned,
            ElementSizes::variable(sizes),
            n,
            self.num_global_elements,
        )
    }

    /// Identical ids in identical order with identical element sizes (local check).
    pub fn same_local_layout(&self, other: &BlockMap) -> bool {
        self.gids == other.gids
            && self.num_owned == other.num_owned
            && (0..self.gids.len()).all(|l| self.element_size(l) == other.element_size(l))
    }
}

impl DebugInvariants for BlockMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "BlockMap");
    }

    fn validate_invariants(&self) -> Result<(), BalanceError> {
        if self.lookup.len() != self.gids.len() {
            return Err(BalanceError::InconsistentMap {
                rank: self.rank,
                gid: GlobalId::default(),
                referenced_by: None,
                detail: format!(
                    "lookup has {} entries for {} ids",
                    self.lookup.len(),
                    self.gids.len()
                ),
            });
        }
        for (lid, &g) in self.gids.iter().enumerate() {
            if self.lookup.get(&g) != Some(&lid) {
                return Err(BalanceError::InconsistentMap {
                    rank: self.rank,
                    gid: g,
                    referenced_by: None,
                    detail: format!("lookup does not map back to lid {lid}"),
                });
            }
        }
        if let ElementSizes::Variable { sizes, offsets } = &self.sizes {
            let ok = offsets.len() == sizes.len() + 1
                && offsets.first() == Some(&0)
                && sizes
                    .iter()
                    .enumerate()
                    .all(|(i, &s)| offsets[i + 1] == offsets[i] + s);
            if !ok {
                return Err(BalanceError::InvalidSize {
                    rank: self.rank,
                    detail: "element offsets are not the prefix sum of sizes".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::point::gids;

    fn owned(ids: &[u64], size: usize) -> BlockMap {
        BlockMap::from_parts(0, gids(ids), ElementSizes::Constant(size), ids.len(), ids.len() as u64)
            .unwrap()
    }

    #[test]
    fn constant_layout() {
        let m = owned(&[5, 7, 1], 3);
        assert_eq!(m.lid(GlobalId::new(7)), Some(1));
        assert_eq!(m.gid(2), Some(GlobalId::new(1)));
        assert_eq!(m.num_my_points(), 9);
        assert_eq!(m.first_point_in_element(2), 6);
        assert_eq!(m.element_range(1), 3..6);
        assert_eq!(m.lid(GlobalId::new(0)), None);
    }

    #[test]
    fn overlap_prefix_and_ghosts() {
        let m = BlockMap::from_parts(1, gids(&[5, 7, 0, 2]), ElementSizes::Constant(1), 2, 4)
            .unwrap();
        assert_eq!(m.owned_ids(), &gids(&[5, 7])[..]);
        assert_eq!(m.ghost_ids(), &gids(&[0, 2])[..]);
        assert_eq!(m.num_owned_points(), 2);
        let m3 = m.three_dimensional();
        assert_eq!(m3.num_my_points(), 12);
        assert_eq!(m3.num_owned_points(), 6);
        assert_eq!(m3.global_ids(), m.global_ids());
    }

    #[test]
    fn variable_sizes_allow_zero() {
        let m = BlockMap::from_parts(
            0,
            gids(&[1, 2, 3]),
            ElementSizes::variable(vec![2, 0, 3]),
            3,
            3,
        )
        .unwrap();
        assert_eq!(m.num_my_points(), 5);
        assert_eq!(m.first_point_in_element(2), 2);
        assert!(m.element_range(1).is_empty());
        m.validate_invariants().unwrap();
    }

    #[test]
    fn rejects_bad_parts() {
        assert!(matches!(
            BlockMap::from_parts(0, gids(&[1]), ElementSizes::Constant(0), 1, 1),
            Err(BalanceError::InvalidSize { .. })
        ));
        assert!(matches!(
            BlockMap::from_parts(0, gids(&[1, 1]), ElementSizes::Constant(1), 2, 2),
            Err(BalanceError::InconsistentMap { .. })
        ));
        assert!(matches!(
            BlockMap::from_parts(0, gids(&[1, 2]), ElementSizes::variable(vec![1]), 2, 2),
            Err(BalanceError::InvalidSize { .. })
        ));
    }

    #[test]
    fn bond_map_follows_neighbour_counts() {
        let m = owned(&[0, 4], 1);
        let nbhd = NeighborhoodData::from_csr(gids(&[0, 4]), vec![0, 2, 3], gids(&[1, 4, 0]))
            .unwrap();
        let b = m.bond_map(&nbhd).unwrap();
        assert_eq!(b.num_my_points(), 3);
        assert_eq!(b.element_size(0), 2);
        assert_eq!(b.first_point_in_element(1), 2);

        let other = owned(&[4, 0], 1);
        assert!(other.bond_map(&nbhd).is_err());
    }

    #[test]
    fn same_local_layout_compares_sizes() {
        let a = owned(&[1, 2], 3);
        let b = BlockMap::from_parts(0, gids(&[1, 2]), ElementSizes::variable(vec![3, 3]), 2, 2)
            .unwrap();
        assert!(a.same_local_layout(&b));
        assert!(!a.same_local_layout(&owned(&[1, 2], 1)));
        assert!(!a.same_local_layout(&owned(&[2, 1], 3)));
    }
}
