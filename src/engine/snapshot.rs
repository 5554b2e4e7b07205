//! Read-only view handed to output writers.

use crate::balance_error::BalanceError;
use crate::data::block_map::BlockMap;
use crate::data::data_manager::DataManager;
use crate::data::field::Step;
use crate::data::mothership::{Mothership, MothershipVector};
use crate::topology::neighborhood::NeighborhoodData;
use std::collections::BTreeMap;

/// material name → scalar output name → output index.
pub type MaterialOutputs = BTreeMap<String, BTreeMap<String, usize>>;

/// Everything an output writer may read at one instant.
///
/// Borrowed from the engine, so it cannot outlive the next rebalance.
#[derive(Clone, Copy, Debug)]
pub struct OutputSnapshot<'a> {
    pub time: f64,
    pub step: u64,
    pub epoch: u64,
    pub owned_map: &'a BlockMap,
    pub owned_map_3d: &'a BlockMap,
    pub neighborhood: &'a NeighborhoodData,
    pub mothership: &'a Mothership,
    pub data: &'a DataManager,
    pub material_outputs: &'a MaterialOutputs,
}

impl<'a> OutputSnapshot<'a> {
    pub fn vector(&self, v: MothershipVector) -> &'a [f64] {
        self.mothership.get(v)
    }

    /// Owned part of a field state.
    pub fn owned_values(&self, name: &str, step: Step) -> Result<&'a [f64], BalanceError> {
        let spec = self.data.spec(name)?;
        let all = self.data.get_data(name, step)?;
        let len = match spec.kind.components() {
            Some(c) => c * self.owned_map.num_owned_elements(),
            None => all.len(),
        };
        Ok(&all[..len])
    }

    /// Output index of `name` for `material`.
    pub fn output_index(&self, material: &str, name: &str) -> Option<usize> {
        self.material_outputs.get(material)?.get(name).copied()
    }
}
