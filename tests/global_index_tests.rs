mod util;

use peri_balance::algs::communicator::{Communicator, RayonComm, TagSequence};
use peri_balance::algs::import::GhostImporter;
use peri_balance::balance_error::BalanceError;
use peri_balance::data::global_index::{build_overlap, build_owned, same_as};
use peri_balance::topology::neighborhood::NeighborhoodData;
use util::{cube_discretization, gid, gids, run_ranks};

#[test]
fn cube_overlap_maps() {
    let got = run_ranks(2, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x3000);
        let disc = cube_discretization(comm.rank());
        let owned = build_owned(&comm, &disc.owned_ids, 1, &mut tags).unwrap();
        let nbhd = NeighborhoodData::build(comm.rank(), &disc.owned_ids, &disc.neighbor_lists).unwrap();
        let (overlap, owners) = build_overlap(&comm, &owned, &nbhd, &mut tags).unwrap();
        let three = overlap.three_dimensional();
        (
            owned.num_global_elements(),
            overlap.global_ids().to_vec(),
            owners,
            three.num_my_points(),
            nbhd.neighborhood_list_size(),
        )
    });
    let (global, ids0, owners0, len3d, list) = &got[0];
    assert_eq!(*global, 8);
    assert_eq!(ids0, &gids(&[0, 2, 4, 6, 1, 3, 5, 7]));
    assert_eq!(owners0, &vec![1, 1, 1, 1]);
    assert_eq!(*len3d, 24);
    // 4 owned points * (1 count + 7 neighbours)
    assert_eq!(*list, 32);
    assert_eq!(got[1].1, gids(&[5, 7, 1, 3, 0, 2, 4, 6]));
}

#[test]
fn ghost_import_pulls_owner_values() {
    let got = run_ranks(2, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x3100);
        let disc = cube_discretization(comm.rank());
        let owned = build_owned(&comm, &disc.owned_ids, 1, &mut tags).unwrap();
        let nbhd = NeighborhoodData::build(comm.rank(), &disc.owned_ids, &disc.neighbor_lists).unwrap();
        let (overlap, owners) = build_overlap(&comm, &owned, &nbhd, &mut tags).unwrap();
        let importer = GhostImporter::build(&comm, &overlap, &owners, &mut tags).unwrap();
        // Two components per point: (gid, -gid) on owners, garbage on ghosts.
        let mut values = vec![f64::NAN; 2 * overlap.num_my_elements()];
        for (lid, g) in overlap.owned_ids().iter().enumerate() {
            values[2 * lid] = g.get() as f64;
            values[2 * lid + 1] = -(g.get() as f64);
        }
        importer.import(&comm, &mut tags, 2, &mut values).unwrap();
        (overlap.global_ids().to_vec(), values, importer.num_imports())
    });
    for (ids, values, imports) in got {
        assert_eq!(imports, 4);
        for (lid, g) in ids.iter().enumerate() {
            assert_eq!(values[2 * lid], g.get() as f64);
            assert_eq!(values[2 * lid + 1], -(g.get() as f64));
        }
    }
}

#[test]
fn unowned_neighbour_is_inconsistent() {
    let got = run_ranks(2, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x3200);
        let mut disc = cube_discretization(comm.rank());
        if comm.rank() == 1 {
            disc.neighbor_lists.get_mut(&gid(5)).unwrap().push(gid(42));
        }
        let owned = build_owned(&comm, &disc.owned_ids, 1, &mut tags).unwrap();
        let nbhd = NeighborhoodData::build(comm.rank(), &disc.owned_ids, &disc.neighbor_lists).unwrap();
        build_overlap(&comm, &owned, &nbhd, &mut tags).map(|_| ())
    });
    assert!(matches!(
        &got[1],
        Err(BalanceError::InconsistentMap { gid: g, referenced_by: Some(by), .. })
            if *g == gid(42) && *by == gid(5)
    ));
    assert!(matches!(got[0], Err(BalanceError::CommError { neighbor: 1, .. })));
}

#[test]
fn empty_global_set_is_invalid_everywhere() {
    let got = run_ranks(2, |comm: RayonComm| {
        build_owned(&comm, &[], 1, &mut TagSequence::new(0x3300)).map(|_| ())
    });
    assert!(got.iter().all(|r| matches!(r, Err(BalanceError::InvalidSize { .. }))));
}

#[test]
fn a_rank_may_own_nothing() {
    let got = run_ranks(2, |comm: RayonComm| {
        let mut tags = TagSequence::new(0x3400);
        let ids = if comm.rank() == 0 { gids(&[0, 1]) } else { Vec::new() };
        let a = build_owned(&comm, &ids, 1, &mut tags).unwrap();
        let b = build_owned(&comm, &ids, 1, &mut tags).unwrap();
        (a.num_my_elements(), a.num_global_elements(), same_as(&comm, &a, &b, &mut tags).unwrap())
    });
    assert_eq!(got[0], (2, 2, true));
    assert_eq!(got[1], (0, 2, true));
}
