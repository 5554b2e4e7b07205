//! Engine lifecycle states and reports.

/// Phase of a [`RebalanceEngine`](super::RebalanceEngine).
///
/// `Stable → Planning → Migrating → Rebuilding → Stable`; any error moves the
/// engine to the terminal `Failed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EngineState {
    Stable,
    Planning,
    Migrating,
    Rebuilding,
    Failed,
}

impl EngineState {
    /// Whether `self → next` is a legal move.
    pub fn can_advance_to(self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Stable, Planning)
                | (Planning, Stable)
                | (Planning, Migrating)
                | (Migrating, Rebuilding)
                | (Rebuilding, Stable)
                | (Planning | Migrating | Rebuilding, Failed)
        )
    }
}

/// Outcome of one `rebalance` call on this rank.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RebalanceReport {
    /// Epoch after the call.
    pub epoch: u64,
    /// Nobody's ownership changed; nothing was touched.
    pub no_op: bool,
    pub exported: usize,
    pub imported: usize,
}

/// What [`teardown`](super::RebalanceEngine::teardown) hands back.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EngineSummary {
    pub rank: usize,
    pub final_state: EngineState,
    /// Rebalances that moved at least one point anywhere.
    pub migrations: u64,
    pub no_op_rebalances: u64,
    pub steps: u64,
    pub time: f64,
    pub owned_points: usize,
}

#[cfg(test)]
mod tests {
    use super::EngineState::*;

    #[test]
    fn lifecycle_edges() {
        assert!(Stable.can_advance_to(Planning));
        assert!(Planning.can_advance_to(Stable));
        assert!(Rebuilding.can_advance_to(Failed));
        assert!(!Stable.can_advance_to(Migrating));
        assert!(!Failed.can_advance_to(Stable));
        assert!(!Stable.can_advance_to(Failed));
    }
}
