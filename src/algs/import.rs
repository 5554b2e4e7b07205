//! Owner → ghost value import for overlap buffers.
//!
//! The pattern is fixed when the overlap map is built: each rank tells every
//! ghost owner which ids it needs, and the owner records the local ids to
//! gather. An import is then a single sparse exchange of `f64` values.

use crate::algs::communicator::{Communicator, TagSequence};
use crate::algs::exchange::{agree, sparse_exchange};
use crate::balance_error::BalanceError;
use crate::data::block_map::BlockMap;
use crate::topology::point::GlobalId;
use std::collections::BTreeMap;
use std::mem::size_of;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GhostImporter {
    /// owner rank → overlap local ids to fill, in request order.
    recv_plan: BTreeMap<usize, Vec<usize>>,
    /// requesting rank → owned local ids to gather, in request order.
    send_plan: BTreeMap<usize, Vec<usize>>,
    overlap_len: usize,
}

impl GhostImporter {
    /// Collectively build the import pattern of `overlap`.
    ///
    /// `ghost_owners` is parallel to `overlap.ghost_ids()`.
    pub fn build<C: Communicator>(
        comm: &C,
        overlap: &BlockMap,
        ghost_owners: &[usize],
        tags: &mut TagSequence,
    ) -> Result<Self, BalanceError> {
        let rank = comm.rank();
        let ghosts = overlap.ghost_ids();
        let local = if ghosts.len() == ghost_owners.len() {
            Ok(())
        } else {
            Err(BalanceError::LengthMismatch {
                what: "ghost owners".into(),
                expected: ghosts.len(),
                got: ghost_owners.len(),
            })
        };
        agree(comm, tags.next(), local)?;

        let first_ghost = overlap.num_owned_elements();
        let mut requests: BTreeMap<usize, Vec<GlobalId>> = BTreeMap::new();
        let mut recv_plan: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (k, (&g, &owner)) in ghosts.iter().zip(ghost_owners).enumerate() {
            requests.entry(owner).or_default().push(g);
            recv_plan.entry(owner).or_default().push(first_ghost + k);
        }
        let asked = sparse_exchange(comm, tags.next(), &requests)?;

        let mut send_plan = BTreeMap::new();
        let mut local = Ok(());
        for (src, gids) in asked {
            let mut lids = Vec::with_capacity(gids.len());
            for g in gids {
                match overlap.lid(g).filter(|&l| l < first_ghost) {
                    Some(l) => lids.push(l),
                    None if local.is_ok() => {
                        local = Err(BalanceError::InconsistentMap {
                            rank,
                            gid: g,
                            referenced_by: None,
                            detail: format!("requested as a ghost by rank {src} but not owned here"),
                        });
                    }
                    None => {}
                }
            }
            send_plan.insert(src, lids);
        }
        agree(comm, tags.next(), local)?;

        Ok(Self {
            recv_plan,
            send_plan,
            overlap_len: overlap.num_my_elements(),
        })
    }

    /// Number of ghost elements this rank receives.
    pub fn num_imports(&self) -> usize {
        self.recv_plan.values().map(Vec::len).sum()
    }

    /// Number of owned elements this rank ships to others.
    pub fn num_exports(&self) -> usize {
        self.send_plan.values().map(Vec::len).sum()
    }

    /// Overwrite the ghost entries of `values` with their owners' values.
    ///
    /// `values` conforms to the overlap map with `element_size` values per
    /// element.
    pub fn import<C: Communicator>(
        &self,
        comm: &C,
        tags: &mut TagSequence,
        element_size: usize,
        values: &mut [f64],
    ) -> Result<(), BalanceError> {
        let expected = self.overlap_len * element_size;
        let local = if element_size == 0 {
            Err(BalanceError::InvalidSize {
                rank: comm.rank(),
                detail: "element size must be positive".into(),
            })
        } else if values.len() == expected {
            Ok(())
        } else {
            Err(BalanceError::LengthMismatch {
                what: "overlap buffer".into(),
                expected,
                got: values.len(),
            })
        };
        agree(comm, tags.next(), local)?;

        let outgoing: BTreeMap<usize, Vec<f64>> = self
            .send_plan
            .iter()
            .map(|(&dst, lids)| {
                let mut buf = Vec::with_capacity(lids.len() * element_size);
                for &l in lids {
                    buf.extend_from_slice(&values[l * element_size..(l + 1) * element_size]);
                }
                (dst, buf)
            })
            .collect();
        let mut incoming = sparse_exchange(comm, tags.next(), &outgoing)?;

        for (&src, lids) in &self.recv_plan {
            let data = incoming.remove(&src).unwrap_or_default();
            if data.len() != lids.len() * element_size {
                return Err(BalanceError::BufferSizeMismatch {
                    neighbor: src,
                    expected: lids.len() * element_size * size_of::<f64>(),
                    got: data.len() * size_of::<f64>(),
                });
            }
            for (chunk, &l) in data.chunks_exact(element_size).zip(lids) {
                values[l * element_size..(l + 1) * element_size].copy_from_slice(chunk);
            }
        }
        Ok(())
    }
}
