//! Collective construction of [`BlockMap`]s.
//!
//! All functions here are collective: every rank of `comm` must call them in
//! the same order with tags drawn from an identically seeded [`TagSequence`].
//! Local validation failures are agreed on before returning, so either every
//! rank gets a map or every rank gets an error.

use crate::algs::communicator::{Communicator, TagSequence};
use crate::algs::directory::Directory;
use crate::algs::exchange::{agree, all_reduce_and, all_reduce_sum};
use crate::balance_error::BalanceError;
use crate::data::block_map::{BlockMap, ElementSizes};
use crate::topology::neighborhood::NeighborhoodData;
use crate::topology::point::GlobalId;
use hashbrown::HashSet;

/// Build the owned map of `ids` with a constant `element_size`.
///
/// # Errors
/// `InvalidSize` if `element_size == 0`, if a rank lists an id twice, or if
/// the global id set is empty.
pub fn build_owned<C: Communicator>(
    comm: &C,
    ids: &[GlobalId],
    element_size: usize,
    tags: &mut TagSequence,
) -> Result<BlockMap, BalanceError> {
    let rank = comm.rank();
    let local = check_owned_ids(rank, ids, element_size);
    agree(comm, tags.next(), local)?;

    let global = all_reduce_sum(comm, tags.next(), ids.len() as u64)?;
    if global == 0 {
        return Err(BalanceError::InvalidSize {
            rank,
            detail: "global id set is empty".into(),
        });
    }
    if ids.is_empty() {
        log::warn!("[global_index] rank {rank} owns no points");
    }
    BlockMap::from_parts(
        rank,
        ids.to_vec(),
        ElementSizes::Constant(element_size),
        ids.len(),
        global,
    )
}

fn check_owned_ids(rank: usize, ids: &[GlobalId], element_size: usize) -> Result<(), BalanceError> {
    if element_size == 0 {
        return Err(BalanceError::InvalidSize {
            rank,
            detail: "element size must be positive".into(),
        });
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for &g in ids {
        if !seen.insert(g) {
            return Err(BalanceError::InvalidSize {
                rank,
                detail: format!("gid {g} listed twice in the owned id set"),
            });
        }
    }
    Ok(())
}

/// Owned ids first, then every neighbour id not owned locally, in first-seen
/// order of one pass over the neighbour lists.
pub fn overlap_order(owned: &[GlobalId], nbhd: &NeighborhoodData) -> (Vec<GlobalId>, Vec<GlobalId>) {
    let mut seen: HashSet<GlobalId> = owned.iter().copied().collect();
    let mut ids = owned.to_vec();
    let mut referenced_by = Vec::new();
    for i in 0..nbhd.num_owned_points() {
        for &n in nbhd.neighbors_of(i) {
            if seen.insert(n) {
                ids.push(n);
                referenced_by.push(nbhd.owned_ids()[i]);
            }
        }
    }
    (ids, referenced_by)
}

/// Build the overlap map of `owned` for the bonds in `nbhd`.
///
/// Returns the map and the owning rank of every ghost, parallel to
/// [`BlockMap::ghost_ids`].
///
/// # Errors
/// `InconsistentMap` if a neighbour id is owned by no rank, naming the id and
/// the owned point whose list referenced it.
pub fn build_overlap<C: Communicator>(
    comm: &C,
    owned: &BlockMap,
    nbhd: &NeighborhoodData,
    tags: &mut TagSequence,
) -> Result<(BlockMap, Vec<usize>), BalanceError> {
    let rank = comm.rank();
    let element_size = match (owned.owned_ids() == nbhd.owned_ids(), owned.constant_element_size()) {
        (true, Some(s)) => Ok(s),
        (false, _) => Err(BalanceError::InconsistentMap {
            rank,
            gid: nbhd.owned_ids().first().copied().unwrap_or_default(),
            referenced_by: None,
            detail: "neighbourhood owned ids differ from the owned map".into(),
        }),
        (true, None) => Err(BalanceError::InvalidSize {
            rank,
            detail: "overlap maps need a constant element size".into(),
        }),
    };
    let element_size = agree(comm, tags.next(), element_size)?;

    let (ids, referenced_by) = overlap_order(owned.owned_ids(), nbhd);
    let num_owned = owned.num_owned_elements();
    let directory = Directory::build(comm, owned.owned_ids(), tags)?;
    let owners = directory.lookup(comm, &ids[num_owned..], tags)?;

    let mut ghost_owners = Vec::with_capacity(owners.len());
    let mut missing = None;
    for (k, o) in owners.into_iter().enumerate() {
        match o {
            Some(r) => ghost_owners.push(r),
            None if missing.is_none() => missing = Some(k),
            None => {}
        }
    }
    let local = match missing {
        None => Ok(()),
        Some(k) => Err(BalanceError::InconsistentMap {
            rank,
            gid: ids[num_owned + k],
            referenced_by: Some(referenced_by[k]),
            detail: "is a neighbour but no rank owns it".into(),
        }),
    };
    agree(comm, tags.next(), local)?;

    let global = all_reduce_sum(comm, tags.next(), ids.len() as u64)?;
    log::debug!(
        "[global_index] rank {rank}: overlap {} = {num_owned} owned + {} ghosts",
        ids.len(),
        ghost_owners.len()
    );
    let map = BlockMap::from_parts(
        rank,
        ids,
        ElementSizes::Constant(element_size),
        num_owned,
        global,
    )?;
    Ok((map, ghost_owners))
}

/// True iff every rank has identical ids, order and element sizes in `a` and `b`.
pub fn same_as<C: Communicator>(
    comm: &C,
    a: &BlockMap,
    b: &BlockMap,
    tags: &mut TagSequence,
) -> Result<bool, BalanceError> {
    all_reduce_and(comm, tags.next(), a.same_local_layout(b))
}
