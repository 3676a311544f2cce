use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use shared_logging::LogLevel;

use derma_agents::{
    AgentServices, AnalysisDraft, CancelHandle, CancelSignal, EphemeralKey, ExecutorContext,
    ExecutorError, ExecutorRegistry,
};
use derma_audit::EventType;
use derma_domain::{
    Action, ActionCatalogue, CatalogueError, FailurePolicy, Predicate, StateKey, StateValue,
    WorldState,
};
use derma_planning::Planner;

use crate::config::OrchestratorConfig;
use crate::error::{EngineError, RunError};
use crate::telemetry::OrchestratorTelemetry;
use crate::trace::{AgentRecord, AgentStatus, ExecutionTrace};

/// Observation hooks invoked around agent dispatch. All default to
/// no-ops.
pub trait EngineHooks: Send + Sync {
    /// Called before an action is dispatched.
    fn on_agent_start(&self, _action: &Action) {}
    /// Called after an agent record is finalised.
    fn on_agent_finished(&self, _record: &AgentRecord) {}
    /// Called after the remaining plan suffix is replaced.
    fn on_replan(&self, _replans: usize, _remaining_steps: usize) {}
}

/// Hook implementation that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl EngineHooks for NoopHooks {}

/// Everything a run owns while the engine drives it. The world state
/// and trace live inside the engine call; this carries the rest.
pub struct RunContext {
    /// Run identifier.
    pub run_id: String,
    /// Validated input image.
    pub image: Arc<Vec<u8>>,
    /// Operator privacy request.
    pub privacy_mode: bool,
    /// Shared service handles for this run's intent.
    pub services: Arc<AgentServices>,
    /// The run's analysis scratchpad.
    pub draft: Arc<Mutex<AnalysisDraft>>,
    /// The run's ephemeral encryption key.
    pub key: Arc<EphemeralKey>,
    /// External (caller-level) cancellation.
    pub cancel: CancelSignal,
}

enum StepOutcome {
    Continue,
    Replan,
    Halt(RunError),
}

/// Drives plans to completion: sequential dispatch with per-agent
/// deadlines, observation merging, policy-driven failure handling, and
/// bounded replanning. One engine serves many concurrent runs; each
/// call owns its state and trace exclusively.
pub struct ExecutionEngine {
    catalogue: Arc<ActionCatalogue>,
    planner: Planner,
    registry: ExecutorRegistry,
    config: OrchestratorConfig,
    telemetry: Option<OrchestratorTelemetry>,
}

impl ExecutionEngine {
    /// Creates an engine, validating that every catalogue agent has a
    /// bound executor (fatal at startup).
    pub fn new(
        catalogue: Arc<ActionCatalogue>,
        registry: ExecutorRegistry,
        config: OrchestratorConfig,
    ) -> Result<Self, CatalogueError> {
        catalogue.validate_executors(&registry.agent_ids())?;
        Ok(Self {
            catalogue,
            planner: Planner::new(config.planner_config()),
            registry,
            config,
            telemetry: None,
        })
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: OrchestratorTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Configuration in force.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Catalogue in force.
    #[must_use]
    pub fn catalogue(&self) -> &ActionCatalogue {
        &self.catalogue
    }

    /// Executes from `initial` until `goal` or a fatal error. Every run
    /// leaves exactly one ledger entry: the audit agent's on success, an
    /// `ANALYSIS_HALTED` entry from the engine otherwise.
    pub async fn execute(
        &self,
        initial: WorldState,
        goal: &Predicate,
        ctx: RunContext,
        hooks: &dyn EngineHooks,
    ) -> Result<ExecutionTrace, EngineError> {
        let clock = Arc::clone(&ctx.services.clock);
        let mut trace = ExecutionTrace::new(ctx.run_id.clone(), clock.now(), initial.clone());
        let mut state = initial;

        let plan = match self.planner.plan(&self.catalogue, &state, goal) {
            Ok(plan) => plan,
            Err(err) => {
                return Err(self.halt(trace, state, RunError::Planning(err), &ctx).await);
            }
        };
        self.log(
            LogLevel::Info,
            "engine.plan.generated",
            json!({
                "run_id": ctx.run_id,
                "steps": plan.len(),
                "cost": plan.total_cost(),
            }),
        );
        self.event(
            "engine.plan.generated",
            &ctx.run_id,
            json!({ "steps": plan.len() }),
        )
        .await;

        let mut queue: VecDeque<Action> = plan.steps().iter().cloned().collect();
        let mut replans = 0usize;

        while let Some(action) = queue.pop_front() {
            if ctx.cancel.is_cancelled() {
                return Err(self.halt(trace, state, RunError::Cancelled, &ctx).await);
            }
            if !action.applicable_in(&state) {
                // Observed state diverged from the planned expectations.
                match self
                    .replan(&mut queue, &mut replans, &mut trace, &state, goal, hooks, &ctx)
                    .await
                {
                    Ok(()) => continue,
                    Err(err) => return Err(self.halt(trace, state, err, &ctx).await),
                }
            }

            let outcome = self
                .dispatch(&action, &mut state, &mut trace, hooks, &ctx)
                .await;
            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::Replan => {
                    match self
                        .replan(&mut queue, &mut replans, &mut trace, &state, goal, hooks, &ctx)
                        .await
                    {
                        Ok(()) => {}
                        Err(err) => return Err(self.halt(trace, state, err, &ctx).await),
                    }
                }
                StepOutcome::Halt(err) => {
                    return Err(self.halt(trace, state, err, &ctx).await);
                }
            }
        }

        trace.finalize(state.clone(), clock.now());
        if !state.flag(StateKey::AuditLogged) {
            // Goal variants without an audit step still contribute their
            // single ledger entry here.
            let signals = ctx.draft.lock().safety_signals(false);
            let append = ctx
                .services
                .ledger
                .append(
                    EventType::AnalysisComplete,
                    trace.digest(),
                    ctx.services.crypto.sha256(&ctx.image),
                    &signals,
                    clock.now_ms(),
                    &ctx.run_id,
                )
                .await;
            match append {
                Ok(receipt) => ctx.draft.lock().audit_receipt = Some(receipt),
                Err(err) => {
                    return Err(EngineError {
                        error: RunError::Ledger(err),
                        trace: Box::new(trace),
                        halt_receipt: None,
                    });
                }
            }
        }
        self.event(
            "engine.run.completed",
            &ctx.run_id,
            json!({ "agents": trace.agents.len(), "replans": trace.replans }),
        )
        .await;
        Ok(trace)
    }

    async fn dispatch(
        &self,
        action: &Action,
        state: &mut WorldState,
        trace: &mut ExecutionTrace,
        hooks: &dyn EngineHooks,
        ctx: &RunContext,
    ) -> StepOutcome {
        let clock = Arc::clone(&ctx.services.clock);
        hooks.on_agent_start(action);
        let index = trace.begin_agent(action.agent, &action.name, clock.now());

        let Some(executor) = self.registry.get(action.agent) else {
            return StepOutcome::Halt(RunError::Internal {
                reason: format!("no executor bound for {}", action.agent.label()),
            });
        };
        let (handle, signal) = CancelHandle::new();
        let exec_ctx = ExecutorContext {
            run_id: ctx.run_id.clone(),
            world: state.clone(),
            image: Arc::clone(&ctx.image),
            privacy_mode: ctx.privacy_mode,
            services: Arc::clone(&ctx.services),
            tuning: self.config.tuning(),
            draft: Arc::clone(&ctx.draft),
            key: Arc::clone(&ctx.key),
            cancel: signal,
        };

        let mut run_cancel = ctx.cancel.clone();
        let deadline = Duration::from_millis(self.config.per_agent_timeout_ms);
        let raced = tokio::select! {
            raced = tokio::time::timeout(deadline, executor.execute(&exec_ctx)) => Some(raced),
            () = run_cancel.cancelled() => None,
        };

        match raced {
            None => {
                handle.cancel();
                trace.finish_agent(
                    index,
                    AgentStatus::Cancelled,
                    json!({ "category": "cancelled", "sanitized_message": "run cancelled" }),
                    clock.now(),
                );
                self.finish_hooks(trace, index, hooks).await;
                StepOutcome::Halt(RunError::Cancelled)
            }
            Some(Err(_elapsed)) => {
                // Per-agent deadline: cancel cooperatively, discard any
                // partial updates, apply the action's failure policy.
                handle.cancel();
                trace.finish_agent(
                    index,
                    AgentStatus::TimedOut,
                    json!({
                        "category": "timeout",
                        "sanitized_message": "per-agent deadline exceeded",
                    }),
                    clock.now(),
                );
                self.finish_hooks(trace, index, hooks).await;
                self.apply_policy(
                    action,
                    RunError::Timeout {
                        agent: action.agent.label(),
                        timeout_ms: self.config.per_agent_timeout_ms,
                    },
                )
            }
            Some(Ok(Err(err))) => {
                let status = if action.failure_policy == FailurePolicy::Skip
                    && !matches!(err, ExecutorError::InputRejected { .. })
                {
                    AgentStatus::Skipped
                } else {
                    AgentStatus::Failed
                };
                trace.finish_agent(
                    index,
                    status,
                    json!({
                        "category": err.category(),
                        "sanitized_message": sanitized_message(&err),
                    }),
                    clock.now(),
                );
                self.finish_hooks(trace, index, hooks).await;
                if matches!(err, ExecutorError::InputRejected { .. }) {
                    return StepOutcome::Halt(RunError::ExecutorFailed {
                        agent: action.agent.label(),
                        category: err.category(),
                    });
                }
                self.apply_policy(
                    action,
                    RunError::ExecutorFailed {
                        agent: action.agent.label(),
                        category: err.category(),
                    },
                )
            }
            Some(Ok(Ok(result))) => {
                // Observations first, declared effects last: effects are
                // authoritative and cannot be regressed by an executor.
                for (key, value) in result.state_updates.entries() {
                    if key.is_completion() && matches!(value, StateValue::Flag(false)) {
                        continue;
                    }
                    let _ = state.set(*key, value.clone());
                }
                action.effects.apply_to(state);
                trace.finish_agent(
                    index,
                    AgentStatus::Completed,
                    serde_json::to_value(&result.metadata).unwrap_or(serde_json::Value::Null),
                    clock.now(),
                );
                self.finish_hooks(trace, index, hooks).await;
                if result.should_replan {
                    StepOutcome::Replan
                } else {
                    StepOutcome::Continue
                }
            }
        }
    }

    async fn finish_hooks(&self, trace: &ExecutionTrace, index: usize, hooks: &dyn EngineHooks) {
        if let Some(record) = trace.agents.get(index) {
            hooks.on_agent_finished(record);
            self.log(
                LogLevel::Info,
                "engine.agent.finished",
                json!({
                    "run_id": trace.run_id,
                    "action": record.action_name,
                    "status": record.status.label(),
                }),
            );
            self.event(
                "engine.agent.finished",
                &trace.run_id,
                json!({
                    "action": record.action_name,
                    "status": record.status.label(),
                }),
            )
            .await;
        }
    }

    fn apply_policy(&self, action: &Action, error: RunError) -> StepOutcome {
        match action.failure_policy {
            FailurePolicy::Fatal => StepOutcome::Halt(error),
            FailurePolicy::Replan => StepOutcome::Replan,
            FailurePolicy::Skip => StepOutcome::Continue,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn replan(
        &self,
        queue: &mut VecDeque<Action>,
        replans: &mut usize,
        trace: &mut ExecutionTrace,
        state: &WorldState,
        goal: &Predicate,
        hooks: &dyn EngineHooks,
        ctx: &RunContext,
    ) -> Result<(), RunError> {
        *replans += 1;
        trace.replans = *replans;
        if *replans > self.config.max_replans {
            return Err(RunError::ReplanExhausted {
                limit: self.config.max_replans,
            });
        }
        let plan = self
            .planner
            .plan(&self.catalogue, state, goal)
            .map_err(RunError::Planning)?;
        hooks.on_replan(*replans, plan.len());
        self.log(
            LogLevel::Info,
            "engine.replan",
            json!({
                "run_id": ctx.run_id,
                "replans": *replans,
                "remaining_steps": plan.len(),
            }),
        );
        self.event(
            "engine.replan",
            &ctx.run_id,
            json!({ "replans": *replans, "remaining_steps": plan.len() }),
        )
        .await;
        *queue = plan.steps().iter().cloned().collect();
        Ok(())
    }

    async fn halt(
        &self,
        mut trace: ExecutionTrace,
        state: WorldState,
        error: RunError,
        ctx: &RunContext,
    ) -> EngineError {
        let clock = Arc::clone(&ctx.services.clock);
        trace.finalize(state, clock.now());
        let signals = ctx.draft.lock().safety_signals(true);
        let halt_receipt = ctx
            .services
            .ledger
            .append(
                EventType::AnalysisHalted,
                trace.digest(),
                ctx.services.crypto.sha256(&ctx.image),
                &signals,
                clock.now_ms(),
                &ctx.run_id,
            )
            .await
            .ok();
        if let Some(receipt) = &halt_receipt {
            ctx.draft.lock().audit_receipt = Some(receipt.clone());
        }
        self.log(
            LogLevel::Error,
            "engine.run.halted",
            json!({ "run_id": ctx.run_id, "category": error.category() }),
        );
        self.event(
            "engine.run.halted",
            &ctx.run_id,
            json!({ "category": error.category() }),
        )
        .await;
        EngineError {
            error,
            trace: Box::new(trace),
            halt_receipt,
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.log(level, message, metadata);
        }
    }

    async fn event(&self, event_type: &str, run_id: &str, payload: serde_json::Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.event(event_type, Some(run_id), payload).await;
        }
    }
}

/// Fixed per-category message recorded in trace metadata. Raw executor
/// reasons never leave the process boundary.
fn sanitized_message(err: &ExecutorError) -> &'static str {
    match err {
        ExecutorError::Unavailable { .. } => "backing service unavailable",
        ExecutorError::InputRejected { .. } => "input rejected",
        ExecutorError::InternalFault { .. } => "internal fault",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scripted_services, test_engine, test_run_context, ScriptedVision};
    use derma_agents::{AgentExecutor, ExecutorMetadata, ExecutorResult};
    use derma_domain::{full_analysis_goal, AgentId};

    struct ReplanStub {
        agent: AgentId,
    }

    #[async_trait::async_trait]
    impl AgentExecutor for ReplanStub {
        fn agent(&self) -> AgentId {
            self.agent
        }

        async fn execute(
            &self,
            _ctx: &ExecutorContext,
        ) -> Result<ExecutorResult, ExecutorError> {
            Ok(ExecutorResult::of(ExecutorMetadata::Generic {
                fields: serde_json::Map::new(),
            })
            .replan())
        }
    }

    struct HangingStub;

    #[async_trait::async_trait]
    impl AgentExecutor for HangingStub {
        fn agent(&self) -> AgentId {
            AgentId::Preprocessor
        }

        async fn execute(
            &self,
            _ctx: &ExecutorContext,
        ) -> Result<ExecutorResult, ExecutorError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            unreachable!("the deadline race cancels this executor");
        }
    }

    struct FailingStub {
        agent: AgentId,
    }

    #[async_trait::async_trait]
    impl AgentExecutor for FailingStub {
        fn agent(&self) -> AgentId {
            self.agent
        }

        async fn execute(
            &self,
            _ctx: &ExecutorContext,
        ) -> Result<ExecutorResult, ExecutorError> {
            Err(ExecutorError::InternalFault {
                reason: "synthetic fault with sensitive detail".into(),
            })
        }
    }

    #[tokio::test]
    async fn happy_path_executes_fifteen_agents_in_order() {
        let services = scripted_services(ScriptedVision::confident()).await;
        let engine = test_engine(ExecutorRegistry::standard(), OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let trace = engine
            .execute(
                WorldState::initial(),
                &full_analysis_goal(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap();

        assert_eq!(trace.agents.len(), 15);
        assert_eq!(trace.count_with_status(AgentStatus::Completed), 15);
        assert!(trace.record_for("standard-calibration").is_some());
        assert!(trace.record_for("safety-calibration").is_none());
        assert!(trace.final_state.flag(StateKey::AuditLogged));
        assert_eq!(trace.replans, 0);
        assert_eq!(services.ledger.len().await, 1);
        assert!(services.ledger.verify().unwrap().is_intact());
    }

    #[tokio::test]
    async fn low_confidence_replans_onto_the_safety_branch() {
        let services = scripted_services(ScriptedVision::uncertain()).await;
        let engine = test_engine(ExecutorRegistry::standard(), OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let trace = engine
            .execute(
                WorldState::initial(),
                &full_analysis_goal(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap();

        assert_eq!(trace.replans, 1);
        assert!(trace.record_for("safety-calibration").is_some());
        assert!(trace.record_for("standard-calibration").is_none());
        assert!(trace.final_state.flag(StateKey::SafetyCalibrated));
        assert!(trace.final_state.flag(StateKey::IsLowConfidence));

        let segmentation = trace.record_for("segmentation").unwrap();
        let threshold = segmentation.metadata["threshold"].as_f64().unwrap();
        assert!((threshold - 0.65).abs() < 1e-6);
    }

    #[tokio::test]
    async fn replan_budget_exhaustion_halts_with_a_ledger_entry() {
        let services = scripted_services(ScriptedVision::confident()).await;
        let mut registry = ExecutorRegistry::standard();
        for agent in AgentId::ALL {
            registry.register(Arc::new(ReplanStub { agent }));
        }
        let engine = test_engine(registry, OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let err = engine
            .execute(
                WorldState::initial(),
                &full_analysis_goal(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap_err();

        assert!(matches!(err.error, RunError::ReplanExhausted { limit: 5 }));
        let receipt = err.halt_receipt.unwrap();
        assert_eq!(receipt.entry.event_type, EventType::AnalysisHalted);
        assert_eq!(services.ledger.len().await, 1);
    }

    #[tokio::test]
    async fn timeout_honours_the_deadline() {
        let services = scripted_services(ScriptedVision::confident()).await;
        let mut registry = ExecutorRegistry::standard();
        registry.register(Arc::new(HangingStub));
        let config = OrchestratorConfig {
            per_agent_timeout_ms: 50,
            ..OrchestratorConfig::default()
        };
        let engine = test_engine(registry, config);
        let ctx = test_run_context(&services);

        let err = engine
            .execute(
                WorldState::initial(),
                &full_analysis_goal(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.error,
            RunError::Timeout {
                agent: "preprocessor",
                timeout_ms: 50,
            }
        ));
        let record = err.trace.record_for("preprocessing").unwrap();
        assert_eq!(record.status, AgentStatus::TimedOut);
        let held_for = (record.end_ts.unwrap() - record.start_ts).num_milliseconds();
        assert!(held_for <= 150, "record finalised {held_for} ms after dispatch");
        assert_eq!(services.ledger.len().await, 1);
    }

    #[tokio::test]
    async fn skip_policy_records_and_continues() {
        let services = scripted_services(ScriptedVision::confident()).await;
        let mut registry = ExecutorRegistry::standard();
        registry.register(Arc::new(FailingStub {
            agent: AgentId::ExplainabilityMapper,
        }));
        let engine = test_engine(registry, OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let trace = engine
            .execute(
                WorldState::initial(),
                &full_analysis_goal(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap();

        let record = trace.record_for("explainability-mapping").unwrap();
        assert_eq!(record.status, AgentStatus::Skipped);
        assert_eq!(record.metadata["category"], "internal_fault");
        assert_eq!(record.metadata["sanitized_message"], "internal fault");
        assert!(!record.metadata.to_string().contains("sensitive"));
        assert!(trace.final_state.flag(StateKey::AuditLogged));
    }

    #[tokio::test]
    async fn fatal_failure_halts_and_commits_halted_entry() {
        let services = scripted_services(ScriptedVision::confident()).await;
        let mut registry = ExecutorRegistry::standard();
        registry.register(Arc::new(FailingStub {
            agent: AgentId::Segmenter,
        }));
        let engine = test_engine(registry, OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let err = engine
            .execute(
                WorldState::initial(),
                &full_analysis_goal(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.error,
            RunError::ExecutorFailed {
                agent: "segmenter",
                category: "internal_fault",
            }
        ));
        assert_eq!(
            err.halt_receipt.unwrap().entry.event_type,
            EventType::AnalysisHalted
        );
        assert_eq!(err.trace.count_with_status(AgentStatus::Failed), 1);
    }

    #[tokio::test]
    async fn offline_generator_falls_back_to_local_engine() {
        // scripted_services wires an unreachable primary generator.
        let services = scripted_services(ScriptedVision::confident()).await;
        let engine = test_engine(ExecutorRegistry::standard(), OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let trace = engine
            .execute(
                WorldState::initial(),
                &full_analysis_goal(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap();
        let record = trace.record_for("recommendation").unwrap();
        assert_eq!(record.metadata["engine"], "local-fallback");
    }

    #[tokio::test]
    async fn satisfied_goal_returns_an_empty_trace() {
        let services = scripted_services(ScriptedVision::confident()).await;
        let engine = test_engine(ExecutorRegistry::standard(), OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let mut state = WorldState::initial();
        for key in [
            StateKey::AuditLogged,
            StateKey::FairnessAudited,
            StateKey::ExplainabilityMapped,
            StateKey::RecommendationGenerated,
        ] {
            state.set(key, StateValue::Flag(true)).unwrap();
        }
        let trace = engine
            .execute(state, &full_analysis_goal(), ctx, &NoopHooks)
            .await
            .unwrap();
        assert!(trace.agents.is_empty());
        // audit_logged was already true, so no second entry appears.
        assert_eq!(services.ledger.len().await, 0);
    }

    #[tokio::test]
    async fn empty_plan_without_audit_still_commits_one_entry() {
        let services = scripted_services(ScriptedVision::confident()).await;
        let engine = test_engine(ExecutorRegistry::standard(), OrchestratorConfig::default());
        let ctx = test_run_context(&services);
        let trace = engine
            .execute(
                WorldState::initial(),
                &Predicate::always(),
                ctx,
                &NoopHooks,
            )
            .await
            .unwrap();
        assert!(trace.agents.is_empty());
        assert_eq!(services.ledger.len().await, 1);
    }
}
