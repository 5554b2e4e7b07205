//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Knobs of a [`RebalanceEngine`](super::RebalanceEngine).
///
/// Deserializes from partial input; missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Steps between rebalances; `None` (or `0`) never asks for one.
    pub rebalance_interval: Option<u64>,
    /// Allgather and compare the full id set after every migration.
    pub verify_partition: bool,
    /// First message tag used by the engine's collectives.
    pub base_tag: u16,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            rebalance_interval: None,
            verify_partition: false,
            base_tag: 0x4000,
        }
    }
}

impl RebalanceConfig {
    pub fn with_interval(mut self, steps: u64) -> Self {
        self.rebalance_interval = Some(steps);
        self
    }

    pub fn verified(mut self) -> Self {
        self.verify_partition = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let c: RebalanceConfig = serde_json::from_str(r#"{"rebalance_interval": 50}"#).unwrap();
        assert_eq!(c.rebalance_interval, Some(50));
        assert!(!c.verify_partition);
        assert_eq!(c.base_tag, RebalanceConfig::default().base_tag);
    }

    #[test]
    fn bincode_roundtrip() {
        let c = RebalanceConfig::default().with_interval(3).verified();
        let bytes = bincode::serialize(&c).unwrap();
        let back: RebalanceConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, c);
    }
}
