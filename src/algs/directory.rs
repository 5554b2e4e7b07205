//! Distributed gid → owner directory.
//!
//! Each gid is registered on its *directory rank* `gid % size`. Building the
//! directory is one sparse exchange; a lookup is a query exchange followed by
//! a reply exchange. Nobody ever holds the full global id set.

use crate::algs::communicator::{Communicator, TagSequence};
use crate::algs::exchange::{agree, sparse_exchange};
use crate::balance_error::BalanceError;
use crate::topology::point::GlobalId;
use hashbrown::HashMap;
use std::collections::BTreeMap;

const NO_OWNER: u64 = u64::MAX;

/// Rank responsible for answering queries about `gid`.
#[inline]
pub fn directory_rank(gid: GlobalId, size: usize) -> usize {
    (gid.get() % size as u64) as usize
}

#[derive(Debug, Clone)]
pub struct Directory {
    rank: usize,
    size: usize,
    /// Entries this rank is the directory rank for.
    owners: HashMap<GlobalId, usize>,
}

impl Directory {
    /// Collectively register every rank's `owned` ids.
    ///
    /// An id registered by two ranks fails with
    /// [`BalanceError::PartitionIntegrity`] on the directory rank that saw it;
    /// every other rank gets a [`BalanceError::CommError`].
    pub fn build<C: Communicator>(
        comm: &C,
        owned: &[GlobalId],
        tags: &mut TagSequence,
    ) -> Result<Self, BalanceError> {
        let (rank, size) = (comm.rank(), comm.size());
        let mut outgoing: BTreeMap<usize, Vec<GlobalId>> = BTreeMap::new();
        for &g in owned {
            outgoing.entry(directory_rank(g, size)).or_default().push(g);
        }
        let incoming = sparse_exchange(comm, tags.next(), &outgoing)?;

        let mut owners = HashMap::new();
        let mut duplicates = Vec::new();
        for (src, gids) in incoming {
            for g in gids {
                if let Some(prev) = owners.insert(g, src) {
                    log::debug!("[directory] rank {rank}: gid {g} claimed by ranks {prev} and {src}");
                    duplicates.push(g);
                }
            }
        }
        let local = if duplicates.is_empty() {
            Ok(Self { rank, size, owners })
        } else {
            duplicates.sort_unstable();
            duplicates.dedup();
            Err(BalanceError::integrity(
                rank,
                duplicates,
                "gid owned by more than one rank",
            ))
        };
        agree(comm, tags.next(), local)
    }

    /// Number of entries held by this directory rank.
    pub fn local_entries(&self) -> usize {
        self.owners.len()
    }

    /// Collectively resolve the owners of `gids`; `None` where nobody owns it.
    ///
    /// Results come back in the order of `gids`. Every rank must call this,
    /// even with an empty query.
    pub fn lookup<C: Communicator>(
        &self,
        comm: &C,
        gids: &[GlobalId],
        tags: &mut TagSequence,
    ) -> Result<Vec<Option<usize>>, BalanceError> {
        debug_assert_eq!((self.rank, self.size), (comm.rank(), comm.size()));
        let mut queries: BTreeMap<usize, Vec<GlobalId>> = BTreeMap::new();
        let mut slots: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &g) in gids.iter().enumerate() {
            let d = directory_rank(g, self.size);
            queries.entry(d).or_default().push(g);
            slots.entry(d).or_default().push(i);
        }
        let asked = sparse_exchange(comm, tags.next(), &queries)?;

        let replies: BTreeMap<usize, Vec<u64>> = asked
            .into_iter()
            .map(|(src, gs)| {
                let answers = gs
                    .iter()
                    .map(|g| self.owners.get(g).map_or(NO_OWNER, |&r| r as u64))
                    .collect();
                (src, answers)
            })
            .collect();
        let answered = sparse_exchange(comm, tags.next(), &replies)?;

        let mut out = vec![None; gids.len()];
        for (d, idx) in slots {
            let answers = answered.get(&d).map(Vec::as_slice).unwrap_or(&[]);
            if answers.len() != idx.len() {
                return Err(BalanceError::CommError {
                    neighbor: d,
                    message: format!(
                        "directory rank {d} answered {} of {} queries",
                        answers.len(),
                        idx.len()
                    ),
                });
            }
            for (&i, &a) in idx.iter().zip(answers) {
                out[i] = (a != NO_OWNER).then_some(a as usize);
            }
        }
        Ok(out)
    }
}
