//! The initial, per-rank description of the point cloud.

use crate::balance_error::BalanceError;
use crate::topology::point::GlobalId;
use std::collections::HashMap;

/// Points a rank owns at start-up, with their reference coordinates,
/// volumes and bond lists.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LocalDiscretization {
    pub owned_ids: Vec<GlobalId>,
    /// Three per owned point, in `owned_ids` order.
    pub coordinates: Vec<f64>,
    /// One per owned point.
    pub volumes: Vec<f64>,
    pub neighbor_lists: HashMap<GlobalId, Vec<GlobalId>>,
}

impl LocalDiscretization {
    /// Append one owned point.
    pub fn push(&mut self, gid: GlobalId, xyz: [f64; 3], volume: f64, neighbors: Vec<GlobalId>) {
        self.owned_ids.push(gid);
        self.coordinates.extend_from_slice(&xyz);
        self.volumes.push(volume);
        self.neighbor_lists.insert(gid, neighbors);
    }

    pub fn validate(&self) -> Result<(), BalanceError> {
        let n = self.owned_ids.len();
        if self.coordinates.len() != 3 * n {
            return Err(BalanceError::LengthMismatch {
                what: "reference coordinates".into(),
                expected: 3 * n,
                got: self.coordinates.len(),
            });
        }
        if self.volumes.len() != n {
            return Err(BalanceError::LengthMismatch {
                what: "volumes".into(),
                expected: n,
                got: self.volumes.len(),
            });
        }
        Ok(())
    }
}
