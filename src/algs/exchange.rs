//! Collective exchanges built on the point-to-point [`Communicator`].
//!
//! Every exchange is two stages: a count to *every* other rank on the sizes
//! tag, then payloads on the data tag only where the count is non-zero. Sends
//! are posted before any receive is waited on, and all handles are drained
//! before returning, even on error, so a failing rank never leaves a peer
//! blocked on a message that was never posted.

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, Wait};
use crate::algs::wire::{WireCount, cast_slice, pod_vec_from_bytes};
use crate::balance_error::BalanceError;
use bytemuck::Pod;
use std::collections::BTreeMap;
use std::mem::size_of;

/// Send `counts[peer]` to every other rank and receive theirs.
///
/// Returns a vector indexed by source rank; the local entry is `counts[rank]`.
pub fn exchange_counts<C: Communicator>(
    comm: &C,
    tag: CommTag,
    counts: &[usize],
) -> Result<Vec<usize>, BalanceError> {
    let (rank, size) = (comm.rank(), comm.size());
    if counts.len() != size {
        return Err(BalanceError::LengthMismatch {
            what: "per-rank counts".into(),
            expected: size,
            got: counts.len(),
        });
    }
    let mut received = vec![0usize; size];
    received[rank] = counts[rank];
    if comm.is_no_comm() || size == 1 {
        return Ok(received);
    }

    let wire: Vec<(usize, WireCount)> = (0..size)
        .filter(|&p| p != rank)
        .map(|peer| WireCount::new(counts[peer], peer).map(|c| (peer, c)))
        .collect::<Result<_, _>>()?;

    let mut pending_sends = Vec::with_capacity(size - 1);
    for (peer, c) in &wire {
        pending_sends.push(comm.isend(*peer, tag.as_u16(), cast_slice(std::slice::from_ref(c))));
    }

    let mut pending_recvs = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != rank) {
        let mut buf = [0u8; size_of::<WireCount>()];
        pending_recvs.push((peer, comm.irecv(peer, tag.as_u16(), &mut buf)));
    }

    let mut maybe_err = None;
    for (peer, h) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == size_of::<WireCount>() => {
                let c: WireCount = bytemuck::pod_read_unaligned(&data);
                received[peer] = c.get();
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(BalanceError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: size_of::<WireCount>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(BalanceError::CommError {
                    neighbor: peer,
                    message: format!("failed to receive count from rank {peer}"),
                });
            }
            _ => {} // already failing; just drain
        }
    }
    for s in pending_sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(received),
    }
}

/// Sparse all-to-all of `Pod` items.
///
/// `outgoing[peer]` is delivered to `peer`; an entry for the local rank is
/// moved straight into the result. Ranks that receive nothing from a peer get
/// no entry for it.
pub fn sparse_exchange<C, T>(
    comm: &C,
    tags: ExchangeTags,
    outgoing: &BTreeMap<usize, Vec<T>>,
) -> Result<BTreeMap<usize, Vec<T>>, BalanceError>
where
    C: Communicator,
    T: Pod,
{
    let (rank, size) = (comm.rank(), comm.size());
    if let Some(&bad) = outgoing.keys().find(|&&p| p >= size) {
        return Err(BalanceError::CommError {
            neighbor: bad,
            message: format!("destination rank {bad} outside communicator of size {size}"),
        });
    }
    let counts: Vec<usize> = (0..size)
        .map(|p| outgoing.get(&p).map_or(0, Vec::len))
        .collect();
    let incoming = exchange_counts(comm, tags.sizes, &counts)?;

    let mut result = BTreeMap::new();
    if let Some(own) = outgoing.get(&rank).filter(|v| !v.is_empty()) {
        result.insert(rank, own.clone());
    }
    if comm.is_no_comm() || size == 1 {
        return Ok(result);
    }

    let mut pending_sends = Vec::new();
    for (&peer, items) in outgoing.iter().filter(|(p, v)| **p != rank && !v.is_empty()) {
        pending_sends.push(comm.isend(peer, tags.data.as_u16(), cast_slice(items)));
    }

    let mut pending_recvs = Vec::new();
    for peer in (0..size).filter(|&p| p != rank && incoming[p] > 0) {
        let expected = incoming[peer] * size_of::<T>();
        let mut buf = vec![0u8; expected];
        pending_recvs.push((peer, expected, comm.irecv(peer, tags.data.as_u16(), &mut buf)));
    }

    let mut maybe_err = None;
    for (peer, expected, h) in pending_recvs {
        match h.wait() {
            Some(data) if data.len() == expected => {
                if maybe_err.is_none() {
                    match pod_vec_from_bytes::<T>(&data) {
                        Ok(items) => {
                            result.insert(peer, items);
                        }
                        Err(message) => {
                            maybe_err = Some(BalanceError::CommError {
                                neighbor: peer,
                                message,
                            })
                        }
                    }
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(BalanceError::BufferSizeMismatch {
                    neighbor: peer,
                    expected,
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(BalanceError::CommError {
                    neighbor: peer,
                    message: format!("failed to receive payload from rank {peer}"),
                });
            }
            _ => {}
        }
    }
    for s in pending_sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(result),
    }
}

/// Gather every rank's `local` slice on every rank, indexed by rank.
pub fn allgather<C, T>(comm: &C, tags: ExchangeTags, local: &[T]) -> Result<Vec<Vec<T>>, BalanceError>
where
    C: Communicator,
    T: Pod,
{
    let outgoing: BTreeMap<usize, Vec<T>> =
        (0..comm.size()).map(|p| (p, local.to_vec())).collect();
    let mut got = sparse_exchange(comm, tags, &outgoing)?;
    Ok((0..comm.size())
        .map(|p| got.remove(&p).unwrap_or_default())
        .collect())
}

pub fn all_reduce_sum<C: Communicator>(
    comm: &C,
    tags: ExchangeTags,
    value: u64,
) -> Result<u64, BalanceError> {
    let parts = allgather(comm, tags, &[value])?;
    Ok(parts.iter().flatten().sum())
}

/// Logical AND across all ranks.
pub fn all_reduce_and<C: Communicator>(
    comm: &C,
    tags: ExchangeTags,
    flag: bool,
) -> Result<bool, BalanceError> {
    let parts = allgather(comm, tags, &[u8::from(flag)])?;
    Ok(parts.iter().flatten().all(|&b| b != 0))
}

/// Returns once every rank has entered.
pub fn barrier<C: Communicator>(comm: &C, tag: CommTag) -> Result<(), BalanceError> {
    exchange_counts(comm, tag, &vec![0; comm.size()]).map(|_| ())
}

/// Make a locally fallible step collective: every rank learns whether any
/// rank failed, so no rank walks into the next exchange alone.
///
/// A local error is returned as is; a healthy rank whose peer failed gets a
/// [`BalanceError::CommError`] naming the lowest failing rank.
pub fn agree<C, T>(
    comm: &C,
    tags: ExchangeTags,
    local: Result<T, BalanceError>,
) -> Result<T, BalanceError>
where
    C: Communicator,
{
    let flags = allgather(comm, tags, &[u8::from(local.is_ok())])?;
    let value = local?;
    match flags.iter().position(|f| f.first() != Some(&1)) {
        Some(peer) => Err(BalanceError::CommError {
            neighbor: peer,
            message: format!("rank {peer} failed during a collective step"),
        }),
        None => Ok(value),
    }
}
