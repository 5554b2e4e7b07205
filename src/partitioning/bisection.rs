//! Recursive coordinate bisection.
//!
//! Every rank allgathers `(gid, position, weight)` of all points and runs the
//! same deterministic recursion, so no further agreement is needed:
//!
//! 1. split along the longest bounding-box axis (ties go to the lower axis);
//! 2. order points by `(coordinate, gid)`;
//! 3. the lower `parts / 2` ranks take the longest prefix whose weight does
//!    not exceed `total * (parts / 2) / parts`.

use super::{PartitionInput, Partitioner};
use crate::algs::communicator::{Communicator, TagSequence};
use crate::algs::exchange::{agree, allgather};
use crate::balance_error::BalanceError;
use crate::topology::ownership::OwnerAssignment;
use bytemuck::{Pod, Zeroable};
use hashbrown::HashMap;
use static_assertions::const_assert_eq;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BisectRecord {
    gid: u64,
    xyz: [f64; 3],
    weight: f64,
}

const_assert_eq!(std::mem::size_of::<BisectRecord>(), 40);

#[derive(Copy, Clone, Debug, Default)]
pub struct CoordinateBisection;

impl CoordinateBisection {
    /// Assign every record to one of `parts` ranks starting at `first`.
    fn bisect(records: &mut [BisectRecord], first: usize, parts: usize, out: &mut HashMap<u64, usize>) {
        if records.is_empty() {
            return;
        }
        if parts <= 1 {
            out.extend(records.iter().map(|r| (r.gid, first)));
            return;
        }
        let axis = longest_axis(records);
        records.sort_by(|a, b| {
            a.xyz[axis]
                .total_cmp(&b.xyz[axis])
                .then(a.gid.cmp(&b.gid))
        });
        let left_parts = parts / 2;
        let total: f64 = records.iter().map(|r| r.weight).sum();
        let target = total * left_parts as f64 / parts as f64;
        let mut acc = 0.0;
        let mut split = 0;
        for r in records.iter() {
            if acc + r.weight > target {
                break;
            }
            acc += r.weight;
            split += 1;
        }
        let (lo, hi) = records.split_at_mut(split);
        Self::bisect(lo, first, left_parts, out);
        Self::bisect(hi, first + left_parts, parts - left_parts, out);
    }
}

fn longest_axis(records: &[BisectRecord]) -> usize {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for r in records {
        for d in 0..3 {
            lo[d] = lo[d].min(r.xyz[d]);
            hi[d] = hi[d].max(r.xyz[d]);
        }
    }
    let mut best = 0;
    for d in 1..3 {
        if hi[d] - lo[d] > hi[best] - lo[best] {
            best = d;
        }
    }
    best
}

impl Partitioner for CoordinateBisection {
    fn partition<C: Communicator>(
        &self,
        comm: &C,
        input: &PartitionInput<'_>,
        tags: &mut TagSequence,
    ) -> Result<OwnerAssignment, BalanceError> {
        agree(comm, tags.next(), input.validate())?;
        let local: Vec<BisectRecord> = input
            .owned_ids
            .iter()
            .enumerate()
            .map(|(i, g)| BisectRecord {
                gid: g.get(),
                xyz: [
                    input.coordinates[3 * i],
                    input.coordinates[3 * i + 1],
                    input.coordinates[3 * i + 2],
                ],
                weight: input.weights[i],
            })
            .collect();
        let mut all: Vec<BisectRecord> = allgather(comm, tags.next(), &local)?
            .into_iter()
            .flatten()
            .collect();

        let mut owners = HashMap::with_capacity(all.len());
        Self::bisect(&mut all, 0, comm.size(), &mut owners);

        let mut assignment = OwnerAssignment::new();
        for &g in input.owned_ids {
            let r = owners.get(&g.get()).copied().ok_or_else(|| BalanceError::Partitioner {
                rank: comm.rank(),
                detail: format!("bisection lost gid {g}"),
            })?;
            assignment.set(g, r);
        }
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::point::gids;

    fn rec(gid: u64, x: f64, y: f64, z: f64) -> BisectRecord {
        BisectRecord {
            gid,
            xyz: [x, y, z],
            weight: 1.0,
        }
    }

    #[test]
    fn splits_on_longest_axis_lower_half_to_lower_rank() {
        let mut r = vec![
            rec(0, 0.0, 5.0, 0.0),
            rec(1, 0.0, -5.0, 0.0),
            rec(2, 1.0, 1.0, 0.0),
            rec(3, 1.0, -1.0, 0.0),
        ];
        let mut out = HashMap::new();
        CoordinateBisection::bisect(&mut r, 0, 2, &mut out);
        assert_eq!(out[&1], 0);
        assert_eq!(out[&3], 0);
        assert_eq!(out[&0], 1);
        assert_eq!(out[&2], 1);
    }

    #[test]
    fn ties_break_by_gid_and_lower_axis() {
        // Equal extents on x and y: split on x; equal x broken by gid.
        let mut r = vec![
            rec(5, 0.0, 0.0, 0.0),
            rec(4, 0.0, 1.0, 0.0),
            rec(9, 1.0, 0.0, 0.0),
            rec(8, 1.0, 1.0, 0.0),
        ];
        let mut out = HashMap::new();
        CoordinateBisection::bisect(&mut r, 0, 2, &mut out);
        assert_eq!((out[&4], out[&5], out[&8], out[&9]), (0, 0, 1, 1));
    }

    #[test]
    fn three_parts_balance_weights() {
        let mut r: Vec<_> = (0..9).map(|i| rec(i, i as f64, 0.0, 0.0)).collect();
        let mut out = HashMap::new();
        CoordinateBisection::bisect(&mut r, 0, 3, &mut out);
        let mut counts = [0; 3];
        for v in out.values() {
            counts[*v] += 1;
        }
        assert_eq!(counts, [3, 3, 3]);
        assert_eq!(out[&0], 0);
        assert_eq!(out[&8], 2);
    }

    #[test]
    fn single_rank_keeps_everything() {
        let ids = gids(&[3, 1]);
        let input = PartitionInput {
            owned_ids: &ids,
            coordinates: &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            weights: &[1.0, 1.0],
        };
        let a = CoordinateBisection
            .partition(&NoComm, &input, &mut TagSequence::new(0))
            .unwrap();
        assert!(a.keeps_all(&ids, 0));
    }
}
