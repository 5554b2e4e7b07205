#![allow(dead_code)]
use peri_balance::{
    algs::communicator::{Communicator, RayonComm},
    data::{BlockMap, DataManager, Mothership},
    engine::{LocalDiscretization, RebalanceEngine},
    topology::{neighborhood::ResolvedNeighborhood, point::GlobalId, NeighborhoodData},
};

pub fn gid(u: u64) -> GlobalId {
    GlobalId::new(u)
}

pub fn gids(us: &[u64]) -> Vec<GlobalId> {
    us.iter().copied().map(GlobalId::new).collect()
}

/// Run `f` once per rank of a fresh `n`-rank in-process world, each on its
/// own thread, and collect the results in rank order.
pub fn run_ranks<F, R>(n: usize, f: F) -> Vec<R>
where
    F: Fn(RayonComm) -> R + Sync,
    R: Send,
{
    let world = RayonComm::world(n);
    std::thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Corner `g = i + 2j + 4k` of the cube `[-1, 1]^3`.
pub fn cube_corner(g: u64) -> [f64; 3] {
    let bit = |b: u64| if (g >> b) & 1 == 1 { 1.0 } else { -1.0 };
    [bit(0), bit(1), bit(2)]
}

/// Reference volume of cube corner `g`; distinct per point so migrations are
/// visible in the data.
pub fn cube_volume(g: u64) -> f64 {
    1.0 + 0.125 * g as f64
}

/// The eight-corner cube with every point bonded to all seven others
/// (ascending gid). Rank 0 owns `[0, 2, 4, 6]`, rank 1 owns `[5, 7, 1, 3]`.
pub fn cube_discretization(rank: usize) -> LocalDiscretization {
    let owned: &[u64] = if rank == 0 { &[0, 2, 4, 6] } else { &[5, 7, 1, 3] };
    let mut disc = LocalDiscretization::default();
    for &g in owned {
        let neighbors = (0..8).filter(|&n| n != g).map(GlobalId::new).collect();
        disc.push(gid(g), cube_corner(g), cube_volume(g), neighbors);
    }
    disc
}

/// Two points at `x = -1` (gid 0, rank 0) and `x = +1` (gid 1, rank 1),
/// bonded to each other.
pub fn two_point_discretization(rank: usize) -> LocalDiscretization {
    let (me, other, x) = if rank == 0 { (0, 1, -1.0) } else { (1, 0, 1.0) };
    let mut disc = LocalDiscretization::default();
    disc.push(gid(me), [x, 0.0, 0.0], 1.0, vec![gid(other)]);
    disc
}

/// A line of `n` points at `x = gid`, each bonded to the points within
/// `horizon`, dealt round-robin over `size` ranks.
pub fn line_discretization(rank: usize, size: usize, n: u64, horizon: u64) -> LocalDiscretization {
    let mut disc = LocalDiscretization::default();
    for g in (0..n).filter(|g| (*g as usize) % size == rank) {
        let neighbors = (g.saturating_sub(horizon)..=(g + horizon).min(n - 1))
            .filter(|&m| m != g)
            .map(GlobalId::new)
            .collect();
        disc.push(gid(g), [g as f64, 0.0, 0.0], 1.0, neighbors);
    }
    disc
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}

/// Deep copy of everything a rebalance may touch, for exact comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineImage {
    pub owned: BlockMap,
    pub overlap: BlockMap,
    pub owned_3d: BlockMap,
    pub overlap_3d: BlockMap,
    pub bond: BlockMap,
    pub neighborhood: NeighborhoodData,
    pub resolved: ResolvedNeighborhood,
    pub data: DataManager,
    pub mothership: Mothership,
}

pub fn image<C: Communicator>(engine: &RebalanceEngine<C>) -> EngineImage {
    EngineImage {
        owned: engine.one_dimensional_map().clone(),
        overlap: engine.one_dimensional_overlap_map().clone(),
        owned_3d: engine.three_dimensional_map().clone(),
        overlap_3d: engine.three_dimensional_overlap_map().clone(),
        bond: engine.bond_map().clone(),
        neighborhood: engine.neighborhood().clone(),
        resolved: engine.resolved_neighborhood().clone(),
        data: engine.data_manager().clone(),
        mothership: engine.mothership().clone(),
    }
}
