#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Orchestration core: goal-driven execution engine, intent router, and
//! run lifecycle over the analysis agent catalogue.

/// Orchestrator configuration.
pub mod config;
/// Execution engine and hooks.
pub mod engine;
/// Run-level error taxonomy.
pub mod error;
/// Intent routing.
pub mod router;
/// Run lifecycle: validation, outputs, the runtime facade.
pub mod run;
/// Explicit service wiring.
pub mod services;
/// Telemetry sinks.
pub mod telemetry;
/// Execution traces.
pub mod trace;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, OrchestratorConfig};
pub use derma_agents::ExecutorRegistry;
pub use engine::{EngineHooks, ExecutionEngine, NoopHooks, RunContext};
pub use error::{EngineError, RunError};
pub use router::{route, ArtifactKind, GoalVariant, Intent, RequestedAction, RouteRequest};
pub use run::{
    AnalysisRuntime, ImageMime, ResultPayload, RunFailure, RunInput, RunOutput, MAX_IMAGE_BYTES,
};
pub use services::{ServiceRegistry, ServiceRegistryBuilder};
pub use telemetry::{OrchestratorTelemetry, OrchestratorTelemetryBuilder};
pub use trace::{AgentRecord, AgentStatus, ExecutionTrace};
