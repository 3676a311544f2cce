use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use derma_domain::AgentId;

use crate::context::ExecutorContext;
use crate::executors;
use crate::result::{ExecutorError, ExecutorResult};

/// Trait implemented by every agent executor. Executors are pure with
/// respect to the engine: they observe the context, may consult shared
/// services, and hand back metadata plus observation updates; the
/// planner-declared effects stay authoritative.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Agent this executor is bound to.
    fn agent(&self) -> AgentId;
    /// Performs the agent's work for one invocation.
    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError>;
}

/// Closed map from agent id to executor. Bindings are fixed at startup;
/// the orchestrator validates catalogue coverage before the first run.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: IndexMap<AgentId, Arc<dyn AgentExecutor>>,
}

impl ExecutorRegistry {
    /// Registry with every standard analysis executor bound.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(executors::QualityGateExecutor));
        registry.register(Arc::new(executors::SkinToneExecutor));
        registry.register(Arc::new(executors::StandardCalibrationExecutor));
        registry.register(Arc::new(executors::SafetyCalibrationExecutor));
        registry.register(Arc::new(executors::PreprocessingExecutor));
        registry.register(Arc::new(executors::SegmentationExecutor));
        registry.register(Arc::new(executors::FeatureExtractionExecutor));
        registry.register(Arc::new(executors::LesionDetectionExecutor));
        registry.register(Arc::new(executors::ExplainabilityExecutor));
        registry.register(Arc::new(executors::SimilaritySearchExecutor));
        registry.register(Arc::new(executors::RiskAssessmentExecutor));
        registry.register(Arc::new(executors::FairnessAuditExecutor));
        registry.register(Arc::new(executors::RecommendationExecutor));
        registry.register(Arc::new(executors::LearningExecutor));
        registry.register(Arc::new(executors::EncryptionExecutor));
        registry.register(Arc::new(executors::AuditCommitExecutor));
        registry
    }

    /// Binds an executor for its declared agent. Later bindings replace
    /// earlier ones, which is how tests substitute stubs.
    pub fn register(&mut self, executor: Arc<dyn AgentExecutor>) {
        self.executors.insert(executor.agent(), executor);
    }

    /// Resolves the executor for an agent.
    #[must_use]
    pub fn get(&self, agent: AgentId) -> Option<Arc<dyn AgentExecutor>> {
        self.executors.get(&agent).cloned()
    }

    /// Bound agent ids, for catalogue coverage validation.
    #[must_use]
    pub fn agent_ids(&self) -> HashSet<AgentId> {
        self.executors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derma_domain::ActionCatalogue;

    #[test]
    fn standard_registry_covers_the_catalogue() {
        let registry = ExecutorRegistry::standard();
        let catalogue = ActionCatalogue::dermatology().unwrap();
        catalogue.validate_executors(&registry.agent_ids()).unwrap();
    }

    #[test]
    fn registration_replaces_existing_binding() {
        let registry = ExecutorRegistry::standard();
        assert_eq!(registry.agent_ids().len(), 16);
        assert!(registry.get(AgentId::SafetyCalibrator).is_some());
    }
}
