//! Migration planning: who keeps, who ships, who receives.
//!
//! Given the old owned ids and a new owner assignment, a rank *keeps* the ids
//! assigned to itself (in old local order), *exports* the rest, and *imports*
//! whatever other ranks assign to it (ascending by gid). Its new owned order
//! is `kept ++ imports`.
//!
//! The planner refuses anything that would lose or duplicate a point: every
//! failure is a fatal [`BalanceError::PartitionIntegrity`].

use crate::algs::communicator::{Communicator, TagSequence};
use crate::algs::exchange::{agree, allgather, sparse_exchange};
use crate::balance_error::BalanceError;
use crate::topology::ownership::OwnerAssignment;
use crate::topology::point::GlobalId;
use hashbrown::HashSet;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};

/// One rank's share of a repartition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Ids that stay, in old local order.
    pub kept: Vec<GlobalId>,
    /// `(gid, destination)` in old local order.
    pub exports: Vec<(GlobalId, usize)>,
    /// Ids arriving from other ranks, ascending.
    pub imports: Vec<GlobalId>,
}

impl MigrationPlan {
    /// `kept ++ imports`.
    pub fn new_owned_ids(&self) -> Vec<GlobalId> {
        self.kept.iter().chain(&self.imports).copied().collect()
    }

    /// Nothing leaves and nothing arrives.
    pub fn is_noop(&self) -> bool {
        self.exports.is_empty() && self.imports.is_empty()
    }

    /// Exports grouped by destination, each group in old local order.
    pub fn exports_by_dest(&self) -> BTreeMap<usize, Vec<GlobalId>> {
        let mut out: BTreeMap<usize, Vec<GlobalId>> = BTreeMap::new();
        for &(g, d) in &self.exports {
            out.entry(d).or_default().push(g);
        }
        out
    }
}

/// Split `old_owned` by `owner` into kept ids and exports.
fn split_local(
    rank: usize,
    size: usize,
    old_owned: &[GlobalId],
    owner: impl Fn(GlobalId) -> Option<usize>,
) -> Result<(Vec<GlobalId>, Vec<(GlobalId, usize)>), BalanceError> {
    let mut kept = Vec::new();
    let mut exports = Vec::new();
    let mut missing = Vec::new();
    let mut out_of_range = Vec::new();
    for &g in old_owned {
        match owner(g) {
            None => missing.push(g),
            Some(r) if r >= size => out_of_range.push(g),
            Some(r) if r == rank => kept.push(g),
            Some(r) => exports.push((g, r)),
        }
    }
    if !missing.is_empty() {
        return Err(BalanceError::integrity(rank, missing, "owned ids without a new owner"));
    }
    if !out_of_range.is_empty() {
        return Err(BalanceError::integrity(
            rank,
            out_of_range,
            format!("assigned to a rank outside 0..{size}"),
        ));
    }
    Ok((kept, exports))
}

/// Sort `received` and check it against `kept`.
fn settle_imports(
    rank: usize,
    kept: &[GlobalId],
    mut received: Vec<GlobalId>,
) -> Result<Vec<GlobalId>, BalanceError> {
    received.sort_unstable();
    let twice: Vec<GlobalId> = received
        .iter()
        .tuple_windows()
        .filter(|(a, b)| a == b)
        .map(|(a, _)| *a)
        .dedup()
        .collect();
    if !twice.is_empty() {
        return Err(BalanceError::integrity(rank, twice, "imported more than once"));
    }
    let kept_set: HashSet<GlobalId> = kept.iter().copied().collect();
    let clash: Vec<GlobalId> = received
        .iter()
        .copied()
        .filter(|g| kept_set.contains(g))
        .collect();
    if !clash.is_empty() {
        return Err(BalanceError::integrity(rank, clash, "imported while also kept"));
    }
    Ok(received)
}

/// Builds [`MigrationPlan`]s.
pub struct MigrationPlanner;

impl MigrationPlanner {
    /// Collectively plan the move from `old_owned` to `assignment`.
    ///
    /// `assignment` must cover exactly the locally owned ids.
    pub fn plan<C: Communicator>(
        comm: &C,
        old_owned: &[GlobalId],
        assignment: &OwnerAssignment,
        tags: &mut TagSequence,
    ) -> Result<MigrationPlan, BalanceError> {
        let (rank, size) = (comm.rank(), comm.size());
        let local = split_local(rank, size, old_owned, |g| assignment.owner(g)).and_then(|split| {
            let owned: HashSet<GlobalId> = old_owned.iter().copied().collect();
            let extra: Vec<GlobalId> = assignment
                .iter()
                .map(|(g, _)| g)
                .filter(|g| !owned.contains(g))
                .collect();
            if extra.is_empty() {
                Ok(split)
            } else {
                Err(BalanceError::integrity(
                    rank,
                    extra,
                    "assignment names ids this rank does not own",
                ))
            }
        });
        // A rank with a bad assignment has no export lists to send.
        let (kept, exports) = agree(comm, tags.next(), local)?;

        let mut plan = MigrationPlan {
            kept,
            exports,
            imports: Vec::new(),
        };
        let received = sparse_exchange(comm, tags.next(), &plan.exports_by_dest())?;
        let received: Vec<GlobalId> = received.into_values().flatten().collect();
        let imports = settle_imports(rank, &plan.kept, received);

        // One round carries both the import verdict and the point counts.
        let now_owned = plan.kept.len() + imports.as_ref().map_or(0, Vec::len);
        let local = [
            u64::from(imports.is_ok()),
            old_owned.len() as u64,
            now_owned as u64,
        ];
        let gathered = allgather(comm, tags.next(), &local)?;
        plan.imports = imports?;
        if let Some(peer) = gathered.iter().position(|v| v.first() != Some(&1)) {
            return Err(BalanceError::CommError {
                neighbor: peer,
                message: format!("rank {peer} failed during a collective step"),
            });
        }
        let (before, after) = gathered.iter().fold((0u64, 0u64), |(b, a), v| {
            (b + v.get(1).copied().unwrap_or(0), a + v.get(2).copied().unwrap_or(0))
        });
        if before != after {
            return Err(BalanceError::integrity(
                rank,
                Vec::new(),
                format!("global point count changes from {before} to {after}"),
            ));
        }
        log::debug!(
            "[migration] rank {rank}: keep {}, export {}, import {}",
            plan.kept.len(),
            plan.exports.len(),
            plan.imports.len()
        );
        Ok(plan)
    }

    /// The same algorithm run for every process at once.
    ///
    /// `old_owned_per_process[r]` is rank `r`'s owned list; `assignment`
    /// covers the union. Used as an oracle for the collective planner.
    pub fn plan_serial(
        old_owned_per_process: &[Vec<GlobalId>],
        assignment: &HashMap<GlobalId, usize>,
    ) -> Result<Vec<MigrationPlan>, BalanceError> {
        let size = old_owned_per_process.len();
        let mut plans = Vec::with_capacity(size);
        let mut inbox: Vec<Vec<GlobalId>> = vec![Vec::new(); size];
        for (rank, old) in old_owned_per_process.iter().enumerate() {
            let (kept, exports) = split_local(rank, size, old, |g| assignment.get(&g).copied())?;
            for &(g, d) in &exports {
                inbox[d].push(g);
            }
            plans.push(MigrationPlan {
                kept,
                exports,
                imports: Vec::new(),
            });
        }
        for (rank, (plan, received)) in plans.iter_mut().zip(inbox).enumerate() {
            plan.imports = settle_imports(rank, &plan.kept, received)?;
        }
        let before: usize = old_owned_per_process.iter().map(Vec::len).sum();
        let after: usize = plans.iter().map(|p| p.kept.len() + p.imports.len()).sum();
        if before != after || assignment.len() != before {
            return Err(BalanceError::integrity(
                0,
                Vec::new(),
                format!("{before} points before, {after} after, {} assigned", assignment.len()),
            ));
        }
        Ok(plans)
    }
}

/// Full check that `after` partitions exactly the ids of `before`, globally.
///
/// Allgathers both id sets; expensive, meant for verification runs.
pub fn verify_partition<C: Communicator>(
    comm: &C,
    tags: &mut TagSequence,
    before: &[GlobalId],
    after: &[GlobalId],
) -> Result<(), BalanceError> {
    let rank = comm.rank();
    let all_before: Vec<GlobalId> = allgather(comm, tags.next(), before)?
        .into_iter()
        .flatten()
        .sorted_unstable()
        .collect();
    let all_after: Vec<GlobalId> = allgather(comm, tags.next(), after)?
        .into_iter()
        .flatten()
        .sorted_unstable()
        .collect();
    if all_before == all_after {
        let twice: Vec<GlobalId> = all_after
            .iter()
            .tuple_windows()
            .filter(|(a, b)| a == b)
            .map(|(a, _)| *a)
            .dedup()
            .collect();
        if twice.is_empty() {
            return Ok(());
        }
        return Err(BalanceError::integrity(rank, twice, "owned by more than one rank"));
    }
    let b: HashSet<GlobalId> = all_before.iter().copied().collect();
    let a: HashSet<GlobalId> = all_after.iter().copied().collect();
    let diff: Vec<GlobalId> = b
        .symmetric_difference(&a)
        .copied()
        .sorted_unstable()
        .collect();
    Err(BalanceError::integrity(
        rank,
        diff,
        format!(
            "id multiset changed: {} ids before, {} after",
            all_before.len(),
            all_after.len()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::point::gids;

    fn table(pairs: &[(u64, usize)]) -> HashMap<GlobalId, usize> {
        pairs.iter().map(|&(g, r)| (GlobalId::new(g), r)).collect()
    }

    #[test]
    fn serial_plan_for_cube_swap() {
        let old = vec![gids(&[0, 2, 4, 6]), gids(&[5, 7, 1, 3])];
        let assign = table(&[(0, 0), (2, 1), (4, 0), (6, 0), (5, 1), (7, 0), (1, 1), (3, 1)]);
        let plans = MigrationPlanner::plan_serial(&old, &assign).unwrap();
        assert_eq!(plans[0].new_owned_ids(), gids(&[0, 4, 6, 7]));
        assert_eq!(plans[1].new_owned_ids(), gids(&[5, 1, 3, 2]));
        assert_eq!(plans[0].exports, vec![(GlobalId::new(2), 1)]);
        assert!(!plans[1].is_noop());
    }

    #[test]
    fn serial_plan_rejects_missing_and_out_of_range() {
        let old = vec![gids(&[0, 1])];
        assert!(matches!(
            MigrationPlanner::plan_serial(&old, &table(&[(0, 0)])),
            Err(BalanceError::PartitionIntegrity { .. })
        ));
        assert!(matches!(
            MigrationPlanner::plan_serial(&old, &table(&[(0, 0), (1, 3)])),
            Err(BalanceError::PartitionIntegrity { .. })
        ));
    }

    #[test]
    fn duplicate_owner_is_caught_on_import() {
        // gid 1 owned twice: both ranks ship it to rank 0.
        let old = vec![gids(&[0]), gids(&[1]), gids(&[1])];
        let assign = table(&[(0, 0), (1, 0)]);
        let err = MigrationPlanner::plan_serial(&old, &assign).unwrap_err();
        assert_eq!(
            err,
            BalanceError::integrity(0, gids(&[1]), "imported more than once")
        );
    }

    #[test]
    fn collective_plan_serial_comm() {
        let mut tags = TagSequence::new(0);
        let owned = gids(&[3, 1]);
        let plan =
            MigrationPlanner::plan(&NoComm, &owned, &OwnerAssignment::all_to(&owned, 0), &mut tags)
                .unwrap();
        assert!(plan.is_noop());
        assert_eq!(plan.new_owned_ids(), owned);

        let mut extra = OwnerAssignment::all_to(&owned, 0);
        extra.set(GlobalId::new(9), 0);
        assert!(MigrationPlanner::plan(&NoComm, &owned, &extra, &mut tags).is_err());
    }

    #[test]
    fn verify_partition_serial() {
        let mut tags = TagSequence::new(0);
        verify_partition(&NoComm, &mut tags, &gids(&[1, 2]), &gids(&[2, 1])).unwrap();
        let err = verify_partition(&NoComm, &mut tags, &gids(&[1, 2]), &gids(&[2, 3])).unwrap_err();
        match err {
            BalanceError::PartitionIntegrity { gids: g, .. } => assert_eq!(g, gids(&[1, 3])),
            other => panic!("unexpected {other:?}"),
        }
    }
}
