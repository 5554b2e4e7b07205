//! `RebalanceEngine`: owns the distributed state of one rank and moves it
//! between partitions.
//!
//! The engine holds the maps, the bond topology, every field buffer and the
//! mothership vectors. Consumers borrow views through `&self`/`&mut self`, so
//! nothing they hold can survive a rebalance. A rebalance runs
//!
//! 1. **Planning**: ask the partitioner; if every rank keeps exactly its own
//!    ids, stop and leave everything untouched.
//! 2. **Migrating**: plan, pack one record stream per destination, exchange,
//!    decode and check every expected point arrived exactly once.
//! 3. **Rebuilding**: new maps, neighbourhood, overlap and ghost pattern;
//!    repopulate every buffer by global id; refresh ghosts from their new
//!    owners; re-resolve local bonds; bump the epoch.
//!
//! Every step is collective. Any error leaves the engine `Failed`.

mod config;
mod discretization;
mod snapshot;
mod state;

pub use config::RebalanceConfig;
pub use discretization::LocalDiscretization;
pub use snapshot::{MaterialOutputs, OutputSnapshot};
pub use state::{EngineState, EngineSummary, RebalanceReport};

use crate::algs::communicator::{Communicator, TagSequence};
use crate::algs::exchange::{agree, all_reduce_and, sparse_exchange};
use crate::algs::import::GhostImporter;
use crate::algs::migration::{MigrationPlan, MigrationPlanner, verify_partition};
use crate::algs::wire::{PointRecord, RecordLayout, WireWord, decode_records, encode_records};
use crate::balance_error::BalanceError;
use crate::data::block_map::BlockMap;
use crate::data::data_manager::{DataManager, FieldLayout};
use crate::data::field::{FieldSpec, Step, well_known, well_known_spec};
use crate::data::global_index::{build_overlap, build_owned};
use crate::data::mothership::{Mothership, MothershipVector};
use crate::debug_invariants::DebugInvariants;
use crate::partitioning::{PartitionInput, Partitioner};
use crate::topology::neighborhood::{NeighborhoodBuilder, NeighborhoodData, ResolvedNeighborhood};
use crate::topology::point::GlobalId;
use hashbrown::HashMap;
use std::collections::BTreeMap;

/// Maps, topology and ghost pattern that are rebuilt together.
struct Layout {
    owned: BlockMap,
    overlap: BlockMap,
    owned_3d: BlockMap,
    overlap_3d: BlockMap,
    bond: BlockMap,
    neighborhood: NeighborhoodData,
    resolved: ResolvedNeighborhood,
    importer: GhostImporter,
}

impl Layout {
    /// Collectively derive everything from the owned ids and their bonds.
    fn build<C: Communicator>(
        comm: &C,
        owned_ids: &[GlobalId],
        neighborhood: NeighborhoodData,
        epoch: u64,
        tags: &mut TagSequence,
    ) -> Result<Self, BalanceError> {
        let rank = comm.rank();
        let owned = build_owned(comm, owned_ids, 1, tags)?;
        let (overlap, ghost_owners) = build_overlap(comm, &owned, &neighborhood, tags)?;
        let importer = GhostImporter::build(comm, &overlap, &ghost_owners, tags)?;
        let derived = owned
            .bond_map(&neighborhood)
            .and_then(|bond| Ok((bond, neighborhood.resolve_local(&overlap, epoch)?)));
        let (bond, resolved) = agree(comm, tags.next(), derived)?;
        log::debug!(
            "[engine] rank {rank}: layout epoch {epoch}: {} owned, {} ghosts, {} bonds",
            owned.num_my_elements(),
            overlap.ghost_ids().len(),
            bond.num_my_points()
        );
        Ok(Self {
            owned_3d: owned.three_dimensional(),
            overlap_3d: overlap.three_dimensional(),
            owned,
            overlap,
            bond,
            neighborhood,
            resolved,
            importer,
        })
    }

    fn field_layout(&self) -> FieldLayout {
        FieldLayout {
            owned_points: self.owned.num_my_elements(),
            overlap_points: self.overlap.num_my_elements(),
            bonds: self.bond.num_my_points(),
        }
    }
}

/// Refresh the ghost entries of every overlap point field, all states.
fn import_all_ghosts<C: Communicator>(
    comm: &C,
    importer: &GhostImporter,
    data: &mut DataManager,
    tags: &mut TagSequence,
) -> Result<(), BalanceError> {
    for id in data.overlap_point_fields() {
        let comps = data.spec_of(id).kind.components().unwrap_or(1);
        for state in data.states_mut(id) {
            importer.import(comm, tags, comps, state)?;
        }
    }
    Ok(())
}

pub struct RebalanceEngine<C: Communicator> {
    comm: C,
    config: RebalanceConfig,
    state: EngineState,
    epoch: u64,
    step: u64,
    time: f64,
    steps_since_rebalance: u64,
    migrations: u64,
    no_op_rebalances: u64,
    layout: Layout,
    data: DataManager,
    mothership: Mothership,
    material_outputs: MaterialOutputs,
}

impl<C: Communicator> RebalanceEngine<C> {
    /// Collective start-up.
    ///
    /// Builds maps, neighbourhood, overlap and ghost pattern from `disc`,
    /// registers `Volume`, `Coordinates3d` and `fields`, fills the owned
    /// reference data, imports ghosts and sets `X = Y =` reference coordinates.
    /// A field in `fields` identical to an already registered one is skipped.
    pub fn initialize(
        comm: C,
        config: RebalanceConfig,
        disc: LocalDiscretization,
        fields: &[FieldSpec],
    ) -> Result<Self, BalanceError> {
        let rank = comm.rank();
        let mut tags = TagSequence::new(config.base_tag);
        agree(&comm, tags.next(), disc.validate())?;

        let neighborhood = NeighborhoodData::build(rank, &disc.owned_ids, &disc.neighbor_lists);
        let neighborhood = agree(&comm, tags.next(), neighborhood)?;
        let layout = Layout::build(&comm, &disc.owned_ids, neighborhood, 0, &mut tags)?;

        let mut data = DataManager::new(layout.field_layout());
        let registered = register_all(&mut data, fields);
        agree(&comm, tags.next(), registered)?;

        let n = disc.owned_ids.len();
        data.get_data_mut(well_known::VOLUME, Step::None)?[..n].copy_from_slice(&disc.volumes);
        data.get_data_mut(well_known::COORDINATES3D, Step::None)?[..3 * n]
            .copy_from_slice(&disc.coordinates);
        import_all_ghosts(&comm, &layout.importer, &mut data, &mut tags)?;

        let mut mothership = Mothership::new(n);
        mothership
            .get_mut(MothershipVector::X)
            .copy_from_slice(&disc.coordinates);
        mothership
            .get_mut(MothershipVector::Y)
            .copy_from_slice(&disc.coordinates);

        log::info!(
            "[engine] rank {rank}/{}: initialized {} owned points, {} fields",
            comm.size(),
            n,
            data.fields().len()
        );
        let engine = Self {
            comm,
            config,
            state: EngineState::Stable,
            epoch: 0,
            step: 0,
            time: 0.0,
            steps_since_rebalance: 0,
            migrations: 0,
            no_op_rebalances: 0,
            layout,
            data,
            mothership,
            material_outputs: MaterialOutputs::new(),
        };
        crate::debug_invariants!(engine.validate_invariants(), "RebalanceEngine::initialize");
        Ok(engine)
    }

    /// Collective shutdown; consumes the engine.
    pub fn teardown(self) -> EngineSummary {
        log::info!(
            "[engine] rank {}: teardown after {} steps, {} migrations",
            self.rank(),
            self.step,
            self.migrations
        );
        EngineSummary {
            rank: self.rank(),
            final_state: self.state,
            migrations: self.migrations,
            no_op_rebalances: self.no_op_rebalances,
            steps: self.step,
            time: self.time,
            owned_points: self.layout.owned.num_my_elements(),
        }
    }

    fn ensure_usable(&self) -> Result<(), BalanceError> {
        match self.state {
            EngineState::Stable => Ok(()),
            EngineState::Failed => Err(BalanceError::EngineUnusable { rank: self.rank() }),
            other => Err(BalanceError::InvalidTransition {
                from: other,
                to: EngineState::Planning,
            }),
        }
    }

    fn advance(&mut self, next: EngineState) -> Result<(), BalanceError> {
        if !self.state.can_advance_to(next) {
            return Err(BalanceError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        log::debug!("[engine] rank {}: {:?} -> {:?}", self.rank(), self.state, next);
        self.state = next;
        Ok(())
    }

    fn tags(&self) -> TagSequence {
        TagSequence::new(self.config.base_tag)
    }

    /// Collectively repartition with `partitioner` and migrate everything.
    pub fn rebalance<P: Partitioner>(
        &mut self,
        partitioner: &P,
    ) -> Result<RebalanceReport, BalanceError> {
        self.ensure_usable()?;
        self.advance(EngineState::Planning)?;
        match self.rebalance_inner(partitioner) {
            Ok(report) => Ok(report),
            Err(e) => {
                log::error!("[engine] rank {}: rebalance failed: {e}", self.rank());
                self.state = EngineState::Failed;
                Err(e)
            }
        }
    }

    fn rebalance_inner<P: Partitioner>(
        &mut self,
        partitioner: &P,
    ) -> Result<RebalanceReport, BalanceError> {
        let rank = self.rank();
        let mut tags = self.tags();

        // ----- Planning -----
        let owned_ids = self.layout.owned.global_ids().to_vec();
        let weights: Vec<f64> = (0..owned_ids.len())
            .map(|i| 1.0 + self.layout.neighborhood.num_neighbors(i) as f64)
            .collect();
        let input = PartitionInput {
            owned_ids: &owned_ids,
            coordinates: self.mothership.get(MothershipVector::Y),
            weights: &weights,
        };
        let assignment = partitioner.partition(&self.comm, &input, &mut tags);
        let assignment = agree(&self.comm, tags.next(), assignment)?;
        let keeps = assignment.keeps_all(&owned_ids, rank);
        self.steps_since_rebalance = 0;
        if all_reduce_and(&self.comm, tags.next(), keeps)? {
            self.advance(EngineState::Stable)?;
            self.no_op_rebalances += 1;
            log::info!("[engine] rank {rank}: rebalance is a no-op at epoch {}", self.epoch);
            return Ok(RebalanceReport {
                epoch: self.epoch,
                no_op: true,
                exported: 0,
                imported: 0,
            });
        }

        // ----- Migrating -----
        self.advance(EngineState::Migrating)?;
        let plan = MigrationPlanner::plan(&self.comm, &owned_ids, &assignment, &mut tags)?;
        let record_layout = RecordLayout {
            point_slots: self.data.point_slots() + Mothership::slots(),
            bond_slots: self.data.bond_slots(),
        };
        let outgoing: Result<BTreeMap<usize, Vec<WireWord>>, BalanceError> = plan
            .exports_by_dest()
            .into_iter()
            .map(|(dest, gids)| {
                let records = gids
                    .iter()
                    .map(|&g| self.pack_record(g))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((dest, encode_records(record_layout, &records)))
            })
            .collect();
        let outgoing = agree(&self.comm, tags.next(), outgoing)?;
        let received = sparse_exchange(&self.comm, tags.next(), &outgoing)?;
        let arrived = collect_arrivals(rank, record_layout, &plan, received);
        let mut arrived = agree(&self.comm, tags.next(), arrived)?;

        // ----- Rebuilding -----
        self.advance(EngineState::Rebuilding)?;
        let new_ids = plan.new_owned_ids();
        let mut builder =
            NeighborhoodBuilder::from(self.layout.neighborhood.restrict_to(&plan.kept));
        for g in &plan.imports {
            let rec = arrived.get(g).ok_or_else(|| {
                BalanceError::integrity(rank, vec![*g], "import vanished before rebuild")
            })?;
            builder.push(*g, &rec.neighbors);
        }
        let new_epoch = self.epoch + 1;
        let layout = Layout::build(&self.comm, &new_ids, builder.finish(), new_epoch, &mut tags)
            .map_err(dangling_bond)?;

        let mut data = self.data.empty_like(layout.field_layout());
        let mut mothership = Mothership::new(new_ids.len());
        for (new_lid, &g) in new_ids.iter().enumerate() {
            let count = layout.neighborhood.num_neighbors(new_lid);
            let new_bonds = layout.neighborhood.bond_offset(new_lid);
            match self.layout.owned.lid(g) {
                Some(old_lid) => {
                    data.copy_point_from(&self.data, old_lid, new_lid);
                    mothership.copy_point_from(&self.mothership, old_lid, new_lid);
                    let old_bonds = self.layout.neighborhood.bond_offset(old_lid);
                    data.copy_bonds_from(&self.data, old_bonds, new_bonds, count);
                }
                None => {
                    let rec = arrived.remove(&g).ok_or_else(|| {
                        BalanceError::integrity(rank, vec![g], "import vanished before rebuild")
                    })?;
                    let used = data.unpack_point(new_lid, &rec.point_values);
                    mothership.unpack_point(new_lid, &rec.point_values[used..]);
                    data.unpack_bonds(new_bonds, count, &rec.bond_values);
                }
            }
        }
        import_all_ghosts(&self.comm, &layout.importer, &mut data, &mut tags)?;

        if self.config.verify_partition {
            verify_partition(&self.comm, &mut tags, &owned_ids, &new_ids)?;
        }

        self.layout = layout;
        self.data = data;
        self.mothership = mothership;
        self.epoch = new_epoch;
        self.migrations += 1;
        self.advance(EngineState::Stable)?;
        crate::debug_invariants!(self.validate_invariants(), "RebalanceEngine::rebalance");
        log::info!(
            "[engine] rank {rank}: epoch {new_epoch}: exported {}, imported {}, now own {}",
            plan.exports.len(),
            plan.imports.len(),
            new_ids.len()
        );
        Ok(RebalanceReport {
            epoch: new_epoch,
            no_op: false,
            exported: plan.exports.len(),
            imported: plan.imports.len(),
        })
    }

    fn pack_record(&self, gid: GlobalId) -> Result<PointRecord, BalanceError> {
        let nbhd = &self.layout.neighborhood;
        let lid = self.layout.owned.lid(gid).ok_or_else(|| {
            BalanceError::integrity(self.comm.rank(), vec![gid], "exported but not owned here")
        })?;
        let mut point_values = Vec::new();
        self.data.pack_point(lid, &mut point_values);
        self.mothership.pack_point(lid, &mut point_values);
        let mut bond_values = Vec::new();
        self.data
            .pack_bonds(nbhd.bond_offset(lid), nbhd.num_neighbors(lid), &mut bond_values);
        Ok(PointRecord {
            gid,
            neighbors: nbhd.neighbors_of(lid).to_vec(),
            point_values,
            bond_values,
        })
    }

    /// Integrator hook: commit `Np1` into `N` for every two-step field and
    /// advance the clock.
    pub fn complete_step(&mut self, time: f64) -> Result<(), BalanceError> {
        self.ensure_usable()?;
        self.data.update_state();
        self.step += 1;
        self.steps_since_rebalance += 1;
        self.time = time;
        Ok(())
    }

    /// True once `rebalance_interval` steps have passed since the last rebalance.
    pub fn should_rebalance(&self) -> bool {
        self.state == EngineState::Stable
            && matches!(self.config.rebalance_interval, Some(n) if n > 0 && self.steps_since_rebalance >= n)
    }

    /// Collectively refresh the ghost entries of field `name`, every state.
    ///
    /// Owned-scope and bond fields have no ghosts; the call is a no-op for them.
    pub fn import_ghosts(&mut self, name: &str) -> Result<(), BalanceError> {
        self.ensure_usable()?;
        let mut tags = self.tags();
        let id = self.data.field_id(name);
        let id = agree(&self.comm, tags.next(), id)?;
        if !self.data.overlap_point_fields().contains(&id) {
            return Ok(());
        }
        let comps = self.data.spec_of(id).kind.components().unwrap_or(1);
        for state in self.data.states_mut(id) {
            self.layout.importer.import(&self.comm, &mut tags, comps, state)?;
        }
        Ok(())
    }

    /// Declare the scalar outputs of `material`, indexed in the given order.
    pub fn register_material_outputs(
        &mut self,
        material: &str,
        names: &[&str],
    ) -> Result<(), BalanceError> {
        for &n in names {
            self.data.field_id(n)?;
        }
        let table = names
            .iter()
            .enumerate()
            .map(|(i, &n)| (n.to_string(), i))
            .collect();
        self.material_outputs.insert(material.to_string(), table);
        Ok(())
    }

    pub fn snapshot(&self, time: f64) -> OutputSnapshot<'_> {
        OutputSnapshot {
            time,
            step: self.step,
            epoch: self.epoch,
            owned_map: &self.layout.owned,
            owned_map_3d: &self.layout.owned_3d,
            neighborhood: &self.layout.neighborhood,
            mothership: &self.mothership,
            data: &self.data,
            material_outputs: &self.material_outputs,
        }
    }

    // ----- accessors ------------------------------------------------------

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn one_dimensional_map(&self) -> &BlockMap {
        &self.layout.owned
    }

    pub fn one_dimensional_overlap_map(&self) -> &BlockMap {
        &self.layout.overlap
    }

    pub fn three_dimensional_map(&self) -> &BlockMap {
        &self.layout.owned_3d
    }

    pub fn three_dimensional_overlap_map(&self) -> &BlockMap {
        &self.layout.overlap_3d
    }

    pub fn bond_map(&self) -> &BlockMap {
        &self.layout.bond
    }

    pub fn neighborhood(&self) -> &NeighborhoodData {
        &self.layout.neighborhood
    }

    pub fn resolved_neighborhood(&self) -> &ResolvedNeighborhood {
        &self.layout.resolved
    }

    pub fn ghost_importer(&self) -> &GhostImporter {
        &self.layout.importer
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.data
    }

    pub fn data_manager_mut(&mut self) -> &mut DataManager {
        &mut self.data
    }

    pub fn mothership(&self) -> &Mothership {
        &self.mothership
    }

    pub fn mothership_mut(&mut self) -> &mut Mothership {
        &mut self.mothership
    }

    /// Owned local id of `gid`.
    pub fn owned_lid(&self, gid: GlobalId) -> Option<usize> {
        self.layout.owned.lid(gid)
    }

    pub fn x(&self) -> &[f64] {
        self.mothership.get(MothershipVector::X)
    }
    pub fn u(&self) -> &[f64] {
        self.mothership.get(MothershipVector::U)
    }
    pub fn y(&self) -> &[f64] {
        self.mothership.get(MothershipVector::Y)
    }
    pub fn v(&self) -> &[f64] {
        self.mothership.get(MothershipVector::V)
    }
    pub fn a(&self) -> &[f64] {
        self.mothership.get(MothershipVector::A)
    }
    pub fn force(&self) -> &[f64] {
        self.mothership.get(MothershipVector::Force)
    }

    pub fn u_mut(&mut self) -> &mut [f64] {
        self.mothership.get_mut(MothershipVector::U)
    }
    pub fn y_mut(&mut self) -> &mut [f64] {
        self.mothership.get_mut(MothershipVector::Y)
    }
    pub fn v_mut(&mut self) -> &mut [f64] {
        self.mothership.get_mut(MothershipVector::V)
    }
    pub fn a_mut(&mut self) -> &mut [f64] {
        self.mothership.get_mut(MothershipVector::A)
    }
    pub fn force_mut(&mut self) -> &mut [f64] {
        self.mothership.get_mut(MothershipVector::Force)
    }
}

/// Register the always-present fields, then `fields`, skipping exact repeats.
fn register_all(data: &mut DataManager, fields: &[FieldSpec]) -> Result<(), BalanceError> {
    let base = [well_known::VOLUME, well_known::COORDINATES3D]
        .into_iter()
        .filter_map(well_known_spec);
    for spec in base.cloned().chain(fields.iter().cloned()) {
        if data.spec(&spec.name).is_ok_and(|existing| *existing == spec) {
            continue;
        }
        data.register(spec)?;
    }
    Ok(())
}

/// After a migration, a neighbour nobody owns is a bond the move broke.
fn dangling_bond(e: BalanceError) -> BalanceError {
    match e {
        BalanceError::InconsistentMap {
            rank,
            gid,
            referenced_by: Some(point),
            ..
        } => BalanceError::DanglingBond {
            rank,
            point,
            neighbor: gid,
        },
        other => other,
    }
}

/// Decode every received stream and check it delivers exactly `plan.imports`.
fn collect_arrivals(
    rank: usize,
    layout: RecordLayout,
    plan: &MigrationPlan,
    received: BTreeMap<usize, Vec<WireWord>>,
) -> Result<HashMap<GlobalId, PointRecord>, BalanceError> {
    let mut arrived = HashMap::with_capacity(plan.imports.len());
    for (src, words) in received {
        for rec in decode_records(src, layout, &words)? {
            let g = rec.gid;
            if arrived.insert(g, rec).is_some() {
                return Err(BalanceError::integrity(rank, vec![g], "record arrived twice"));
            }
        }
    }
    let missing: Vec<GlobalId> = plan
        .imports
        .iter()
        .copied()
        .filter(|g| !arrived.contains_key(g))
        .collect();
    if !missing.is_empty() {
        return Err(BalanceError::integrity(rank, missing, "expected imports never arrived"));
    }
    if arrived.len() != plan.imports.len() {
        let expected: hashbrown::HashSet<GlobalId> = plan.imports.iter().copied().collect();
        let mut extra: Vec<GlobalId> = arrived
            .keys()
            .copied()
            .filter(|g| !expected.contains(g))
            .collect();
        extra.sort_unstable();
        return Err(BalanceError::integrity(rank, extra, "unexpected records arrived"));
    }
    Ok(arrived)
}

impl<C: Communicator> DebugInvariants for RebalanceEngine<C> {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "RebalanceEngine");
    }

    fn validate_invariants(&self) -> Result<(), BalanceError> {
        let l = &self.layout;
        l.owned.validate_invariants()?;
        l.overlap.validate_invariants()?;
        l.bond.validate_invariants()?;
        l.neighborhood.validate_invariants()?;
        self.data.validate_invariants()?;
        if l.overlap.owned_ids() != l.owned.global_ids() {
            return Err(BalanceError::InconsistentMap {
                rank: self.rank(),
                gid: l.owned.gid(0).unwrap_or_default(),
                referenced_by: None,
                detail: "overlap map does not start with the owned ids".into(),
            });
        }
        if l.resolved.epoch != self.epoch {
            return Err(BalanceError::InvalidSize {
                rank: self.rank(),
                detail: format!(
                    "resolved neighbourhood is from epoch {}, engine at {}",
                    l.resolved.epoch, self.epoch
                ),
            });
        }
        let want = 3 * l.owned.num_my_elements();
        for v in MothershipVector::ALL {
            let got = self.mothership.get(v).len();
            if got != want {
                return Err(BalanceError::LengthMismatch {
                    what: format!("mothership {v:?}"),
                    expected: want,
                    got,
                });
            }
        }
        Ok(())
    }
}
