//! Partitioning oracles.
//!
//! The rebalance engine does not decide where points go; it asks a
//! [`Partitioner`]. The oracles shipped here are deliberately simple:
//! [`KeepCurrent`] (identity), [`ExplicitAssignment`] (a precomputed global
//! table) and [`bisection::CoordinateBisection`] (recursive coordinate
//! bisection of current positions).

pub mod bisection;

pub use bisection::CoordinateBisection;

use crate::algs::communicator::{Communicator, TagSequence};
use crate::balance_error::BalanceError;
use crate::topology::ownership::OwnerAssignment;
use crate::topology::point::GlobalId;
use std::collections::HashMap;

/// What a partitioner sees of the local partition.
#[derive(Clone, Copy, Debug)]
pub struct PartitionInput<'a> {
    pub owned_ids: &'a [GlobalId],
    /// Current coordinates, three per owned point.
    pub coordinates: &'a [f64],
    /// One weight per owned point.
    pub weights: &'a [f64],
}

impl PartitionInput<'_> {
    /// Check the three arrays describe the same points.
    pub fn validate(&self) -> Result<(), BalanceError> {
        let n = self.owned_ids.len();
        if self.coordinates.len() != 3 * n {
            return Err(BalanceError::LengthMismatch {
                what: "partition coordinates".into(),
                expected: 3 * n,
                got: self.coordinates.len(),
            });
        }
        if self.weights.len() != n {
            return Err(BalanceError::LengthMismatch {
                what: "partition weights".into(),
                expected: n,
                got: self.weights.len(),
            });
        }
        Ok(())
    }
}

/// A partitioning oracle.
///
/// Called collectively on every rank; the returned assignment must cover
/// exactly `input.owned_ids`.
pub trait Partitioner {
    fn partition<C: Communicator>(
        &self,
        comm: &C,
        input: &PartitionInput<'_>,
        tags: &mut TagSequence,
    ) -> Result<OwnerAssignment, BalanceError>;
}

/// Every point stays where it is.
#[derive(Copy, Clone, Debug, Default)]
pub struct KeepCurrent;

impl Partitioner for KeepCurrent {
    fn partition<C: Communicator>(
        &self,
        comm: &C,
        input: &PartitionInput<'_>,
        _tags: &mut TagSequence,
    ) -> Result<OwnerAssignment, BalanceError> {
        Ok(OwnerAssignment::all_to(input.owned_ids, comm.rank()))
    }
}

/// A precomputed global gid → rank table.
///
/// Ids missing from the table are left out of the assignment, which the
/// migration planner rejects.
#[derive(Clone, Debug, Default)]
pub struct ExplicitAssignment(pub HashMap<GlobalId, usize>);

impl ExplicitAssignment {
    pub fn from_pairs<I: IntoIterator<Item = (u64, usize)>>(pairs: I) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(g, r)| (GlobalId::new(g), r))
                .collect(),
        )
    }
}

impl Partitioner for ExplicitAssignment {
    fn partition<C: Communicator>(
        &self,
        _comm: &C,
        input: &PartitionInput<'_>,
        _tags: &mut TagSequence,
    ) -> Result<OwnerAssignment, BalanceError> {
        Ok(OwnerAssignment::from_pairs(
            input
                .owned_ids
                .iter()
                .filter_map(|&g| self.0.get(&g).map(|&r| (g, r))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::point::gids;

    #[test]
    fn explicit_assignment_skips_unknown_ids() {
        let ids = gids(&[1, 2]);
        let input = PartitionInput {
            owned_ids: &ids,
            coordinates: &[0.0; 6],
            weights: &[1.0; 2],
        };
        input.validate().unwrap();
        let p = ExplicitAssignment::from_pairs([(1, 0)]);
        let a = p.partition(&NoComm, &input, &mut TagSequence::new(0)).unwrap();
        assert_eq!(a.len(), 1);
        let k = KeepCurrent.partition(&NoComm, &input, &mut TagSequence::new(0)).unwrap();
        assert!(k.keeps_all(&ids, 0));
    }

    #[test]
    fn input_validation() {
        let ids = gids(&[1]);
        let bad = PartitionInput {
            owned_ids: &ids,
            coordinates: &[0.0; 2],
            weights: &[1.0],
        };
        assert!(bad.validate().is_err());
    }
}
