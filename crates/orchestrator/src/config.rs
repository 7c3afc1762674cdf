//! `OrchestratorConfig`: every tunable named in the specification, loaded
//! from TOML or YAML via `utils`'s config helpers. Parse failures are
//! `Configuration` errors and are fatal at startup (§7).

use serde::{Deserialize, Serialize};

/// Open question (spec §9): `force_root_node_planning` vs. the depth check.
/// Resolved here: `force_root_node_planning` wins for the root node only;
/// the depth check (`layer >= max_planning_layer`) governs every other node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ceiling for concurrently-dispatched node handlers.
    pub max_concurrent_nodes: usize,

    /// Depth (in planning layers) at which a node is forced to `EXECUTE`
    /// regardless of atomizer verdict.
    pub max_planning_layer: usize,

    /// See the Open Question above: whether the root node skips atomization
    /// and is planned unconditionally.
    pub force_root_node_planning: bool,

    /// Upper bound on `replan_attempts` per node (invariant 7).
    pub max_replan_attempts: u32,

    /// Per-node execution timeout, default 2400s (§5).
    pub node_execution_timeout_seconds: u64,

    /// HITL review timeout, default 1200s (§5).
    pub hitl_timeout_seconds: u64,

    /// Whether a HITL timeout should auto-approve rather than abort.
    pub auto_approve_after_timeout: bool,

    /// Scheduler iterations between deadlock scans, default 50 (§4.11).
    pub deadlock_scan_interval: u64,

    /// Fraction of children that must be `DONE` (not merely terminal) for the
    /// tolerant `PLAN_DONE -> AGGREGATING` gate; tunable per the Open
    /// Question in §9 (all-done for the hard transition, this threshold for
    /// the "good enough" aggregation gate).
    pub stuck_aggregation_threshold: f64,

    /// Wall-clock seconds a lone `RUNNING` node may run before the
    /// single-node-hang deadlock pattern fires, default 120.
    pub single_node_hang_seconds: i64,

    /// `BatchedStateManager` tuning, default 50 / 100ms / 1KiB.
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub compression_threshold_bytes: usize,

    /// Context size policy word-count ceiling before summarization/truncation
    /// kicks in (§4.7), default 20_000.
    pub context_word_limit: usize,

    /// How many ancestor layers of goal + summary to include when building
    /// planning/execution context (§4.7).
    pub context_ancestor_layers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            max_concurrent_nodes: 8,
            max_planning_layer: 4,
            force_root_node_planning: true,
            max_replan_attempts: 3,
            node_execution_timeout_seconds: 2400,
            hitl_timeout_seconds: 1200,
            auto_approve_after_timeout: false,
            deadlock_scan_interval: 50,
            stuck_aggregation_threshold: 0.8,
            single_node_hang_seconds: 120,
            batch_size: 50,
            batch_timeout_ms: 100,
            compression_threshold_bytes: 1024,
            context_word_limit: 20_000,
            context_ancestor_layers: 3,
        }
    }
}

impl OrchestratorConfig {
    /// Floor concurrency may shrink to under rate-limit backoff, `max/4`
    /// (§4.11).
    pub fn min_concurrency_floor(&self) -> usize {
        (self.max_concurrent_nodes / 4).max(1)
    }

    pub fn from_toml_str(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::OrchestratorError::General(format!("invalid config: {e}")))
    }

    pub fn from_yaml_str(raw: &str) -> crate::Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| crate::OrchestratorError::General(format!("invalid config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = OrchestratorConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed = OrchestratorConfig::from_toml_str(&raw).unwrap();
        assert_eq!(parsed.max_concurrent_nodes, config.max_concurrent_nodes);
    }

    #[test]
    fn min_concurrency_floor_is_at_least_one() {
        let mut config = OrchestratorConfig::default();
        config.max_concurrent_nodes = 2;
        assert_eq!(config.min_concurrency_floor(), 1);
    }
}
