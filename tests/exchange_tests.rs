mod util;

use peri_balance::algs::communicator::{Communicator, RayonComm, TagSequence};
use peri_balance::algs::directory::Directory;
use peri_balance::algs::exchange::{agree, all_reduce_and, all_reduce_sum, allgather, sparse_exchange};
use peri_balance::balance_error::BalanceError;
use std::collections::BTreeMap;
use util::{gid, gids, run_ranks};

#[test]
fn sparse_exchange_delivers_only_nonempty() {
    let got = run_ranks(3, |comm: RayonComm| {
        let rank = comm.rank();
        let mut tags = TagSequence::new(0x2000);
        // Every rank sends `[rank, peer]` to the next rank only.
        let peer = (rank + 1) % 3;
        let mut out = BTreeMap::new();
        out.insert(peer, vec![rank as u64, peer as u64]);
        out.insert((rank + 2) % 3, Vec::new());
        sparse_exchange(&comm, tags.next(), &out).unwrap()
    });
    for (rank, inbox) in got.iter().enumerate() {
        let from = (rank + 2) % 3;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[&from], vec![from as u64, rank as u64]);
    }
}

#[test]
fn reductions_agree_everywhere() {
    let got = run_ranks(3, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x2100);
        let r = comm.rank() as u64;
        let sum = all_reduce_sum(&comm, tags.next(), r + 1).unwrap();
        let all = all_reduce_and(&comm, tags.next(), r != 1).unwrap();
        let gathered = allgather(&comm, tags.next(), &[r as u32 * 10]).unwrap();
        (sum, all, gathered)
    });
    for (sum, all, gathered) in got {
        assert_eq!(sum, 6);
        assert!(!all);
        assert_eq!(gathered, vec![vec![0], vec![10], vec![20]]);
    }
}

#[test]
fn agree_spreads_a_single_failure() {
    let got = run_ranks(3, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x2200);
        let local = if comm.rank() == 2 {
            Err(BalanceError::UnknownField("Bogus".into()))
        } else {
            Ok(comm.rank())
        };
        let first = agree(&comm, tags.next(), local);
        // A later collective still lines up on every rank.
        let after = all_reduce_sum(&comm, tags.next(), 1).unwrap();
        (first, after)
    });
    assert!(matches!(got[0].0, Err(BalanceError::CommError { neighbor: 2, .. })));
    assert!(matches!(got[1].0, Err(BalanceError::CommError { neighbor: 2, .. })));
    assert_eq!(got[2].0, Err(BalanceError::UnknownField("Bogus".into())));
    assert!(got.iter().all(|(_, n)| *n == 3));
}

#[test]
fn directory_resolves_owners_across_ranks() {
    let got = run_ranks(3, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x2300);
        let owned: Vec<_> = (0..12u64)
            .filter(|g| (*g as usize) % 3 == comm.rank())
            .map(gid)
            .collect();
        let dir = Directory::build(&comm, &owned, &mut tags).unwrap();
        dir.lookup(&comm, &gids(&[11, 0, 4, 99]), &mut tags).unwrap()
    });
    for answers in got {
        assert_eq!(answers, vec![Some(2), Some(0), Some(1), None]);
    }
}

#[test]
fn directory_rejects_double_ownership() {
    let got = run_ranks(2, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x2400);
        let owned = if comm.rank() == 0 { gids(&[0, 1]) } else { gids(&[1, 2]) };
        Directory::build(&comm, &owned, &mut tags).map(|_| ())
    });
    // gid 1 lives on directory rank 1.
    assert!(matches!(
        &got[1],
        Err(BalanceError::PartitionIntegrity { gids: bad, .. }) if bad == &vec![gid(1)]
    ));
    assert!(matches!(got[0], Err(BalanceError::CommError { neighbor: 1, .. })));
}
