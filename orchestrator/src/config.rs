use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use derma_agents::AgentTuning;
use derma_planning::PlannerConfig;
use derma_reasoning::BankConfig;

/// Configuration load failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parse error.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Orchestrator configuration. Every field is optional in the JSON form
/// and defaults to the documented value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-executor deadline in milliseconds.
    pub per_agent_timeout_ms: u64,
    /// Planner node-expansion bound.
    pub max_expansions: usize,
    /// Planner wall-clock bound in milliseconds.
    pub plan_deadline_ms: u64,
    /// Replans permitted per run.
    pub max_replans: usize,
    /// Reasoning-bank embedding dimension.
    pub reasoning_bank_dimension: usize,
    /// Confidence below this marks the run low-confidence.
    pub confidence_low_threshold: f32,
    /// Effective decision threshold under safety calibration.
    pub safety_calibration_threshold: f32,
    /// Pattern count above which the bank switches to the coarse index.
    pub max_patterns_brute_force: usize,
    /// Bounded persistence flush interval in milliseconds.
    pub persistence_flush_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            per_agent_timeout_ms: 10_000,
            max_expansions: 10_000,
            plan_deadline_ms: 500,
            max_replans: 5,
            reasoning_bank_dimension: 384,
            confidence_low_threshold: 0.65,
            safety_calibration_threshold: 0.5,
            max_patterns_brute_force: 10_000,
            persistence_flush_interval_ms: 1_000,
        }
    }
}

impl OrchestratorConfig {
    /// Loads configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Planner bounds.
    #[must_use]
    pub const fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            max_expansions: self.max_expansions,
            plan_deadline_ms: self.plan_deadline_ms,
        }
    }

    /// Reasoning-bank settings.
    #[must_use]
    pub const fn bank_config(&self) -> BankConfig {
        BankConfig {
            dimension: self.reasoning_bank_dimension,
            max_patterns_brute_force: self.max_patterns_brute_force,
            persistence_flush_interval_ms: self.persistence_flush_interval_ms,
        }
    }

    /// Executor tuning thresholds.
    #[must_use]
    pub const fn tuning(&self) -> AgentTuning {
        AgentTuning {
            confidence_low_threshold: self.confidence_low_threshold,
            safety_calibration_threshold: self.safety_calibration_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.per_agent_timeout_ms, 10_000);
        assert_eq!(config.max_expansions, 10_000);
        assert_eq!(config.plan_deadline_ms, 500);
        assert_eq!(config.max_replans, 5);
        assert_eq!(config.reasoning_bank_dimension, 384);
        assert!((config.confidence_low_threshold - 0.65).abs() < f32::EPSILON);
        assert!((config.safety_calibration_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.max_patterns_brute_force, 10_000);
        assert_eq!(config.persistence_flush_interval_ms, 1_000);
    }

    #[test]
    fn partial_json_overrides_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{ "max_replans": 2, "plan_deadline_ms": 750 }"#).unwrap();
        assert_eq!(config.max_replans, 2);
        assert_eq!(config.plan_deadline_ms, 750);
        assert_eq!(config.per_agent_timeout_ms, 10_000);
    }
}
