use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use derma_agents::{AnalysisDraft, CancelSignal, EncryptedPayload, ExecutorRegistry};
use derma_audit::{AuditEntry, PersistenceState};
use derma_domain::{ActionCatalogue, CatalogueError, Predicate, WorldState};

use crate::config::OrchestratorConfig;
use crate::engine::{EngineHooks, ExecutionEngine, NoopHooks, RunContext};
use crate::error::RunError;
use crate::router::{route, RouteRequest};
use crate::services::ServiceRegistry;
use crate::telemetry::OrchestratorTelemetry;
use crate::trace::ExecutionTrace;

/// Largest accepted input image.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Accepted image mime types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageMime {
    /// `image/jpeg`.
    Jpeg,
    /// `image/png`.
    Png,
    /// `image/webp`.
    Webp,
}

impl ImageMime {
    /// Mime string.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// Parses a mime string.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "image/jpeg" | "jpeg" | "jpg" => Some(Self::Jpeg),
            "image/png" | "png" => Some(Self::Png),
            "image/webp" | "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// True when the first 12 bytes carry this type's magic signature.
    #[must_use]
    pub fn matches_magic(self, bytes: &[u8]) -> bool {
        if bytes.len() < 12 {
            return false;
        }
        match self {
            Self::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            Self::Png => bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]),
            Self::Webp => bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP",
        }
    }
}

/// One analysis request.
#[derive(Debug, Clone)]
pub struct RunInput {
    /// Raw image bytes.
    pub image_bytes: Vec<u8>,
    /// Declared mime type; must match the magic bytes.
    pub image_mime: ImageMime,
    /// Restricts what the learning agent may store.
    pub privacy_mode: bool,
    /// Overrides the routed goal variant.
    pub goal_override: Option<Predicate>,
}

impl RunInput {
    /// Rejects unusable artifacts before any planning happens: declared
    /// mime must match the magic bytes and the payload must fit the
    /// size cap. No ledger entry and no pattern is written for a
    /// rejected artifact.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.image_bytes.len() > MAX_IMAGE_BYTES {
            return Err(RunError::InvalidArtifact {
                reason: format!("image exceeds {MAX_IMAGE_BYTES} bytes"),
            });
        }
        if !self.image_mime.matches_magic(&self.image_bytes) {
            return Err(RunError::InvalidArtifact {
                reason: format!(
                    "magic bytes do not match declared {}",
                    self.image_mime.label()
                ),
            });
        }
        Ok(())
    }
}

/// Encrypted analysis plus the non-PHI public summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Sealed clinical payload.
    pub encrypted: EncryptedPayload,
    /// Public metadata safe to surface beside it.
    pub public_summary: serde_json::Value,
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Run identifier.
    pub run_id: String,
    /// Full execution trace.
    pub trace: ExecutionTrace,
    /// The run's ledger entry.
    pub audit_entry: AuditEntry,
    /// Whether the ledger met its persistence deadline.
    pub persistence: PersistenceState,
    /// Encrypted result; absent only when the goal needed no payload.
    pub result_payload: Option<ResultPayload>,
}

/// A failed run. Display carries only the run id and category; the
/// trace and ledger receipt remain available to the operator surface.
#[derive(Debug, Error)]
#[error("analysis run {run_id} failed ({category})")]
pub struct RunFailure {
    /// Run identifier.
    pub run_id: String,
    /// Stable category label.
    pub category: &'static str,
    /// Underlying error (not part of user-visible display).
    #[source]
    pub error: RunError,
    /// Finalised trace, absent when the run failed before planning.
    pub trace: Option<Box<ExecutionTrace>>,
    /// The run's `ANALYSIS_HALTED` entry, when the halt path reached
    /// the ledger.
    pub audit_entry: Option<AuditEntry>,
}

/// Facade owning the engine and service wiring; one instance serves
/// many concurrent runs.
pub struct AnalysisRuntime {
    engine: ExecutionEngine,
    registry: ServiceRegistry,
}

impl AnalysisRuntime {
    /// Builds a runtime over the canonical dermatology catalogue.
    pub fn new(
        registry: ServiceRegistry,
        executors: ExecutorRegistry,
        config: OrchestratorConfig,
    ) -> Result<Self, CatalogueError> {
        let catalogue = Arc::new(ActionCatalogue::dermatology()?);
        let engine = ExecutionEngine::new(catalogue, executors, config)?;
        Ok(Self { engine, registry })
    }

    /// Attaches telemetry sinks to the engine.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: OrchestratorTelemetry) -> Self {
        self.engine = self.engine.with_telemetry(telemetry);
        self
    }

    /// Runs one analysis to completion.
    pub async fn analyze(
        &self,
        input: RunInput,
        request: RouteRequest,
    ) -> Result<RunOutput, RunFailure> {
        self.analyze_with(input, request, CancelSignal::never(), &NoopHooks)
            .await
    }

    /// Runs one analysis with caller-controlled cancellation and hooks.
    pub async fn analyze_with(
        &self,
        input: RunInput,
        request: RouteRequest,
        cancel: CancelSignal,
        hooks: &dyn EngineHooks,
    ) -> Result<RunOutput, RunFailure> {
        let run_id = self.registry.ids().next_id();
        if let Err(error) = input.validate() {
            return Err(RunFailure {
                run_id,
                category: error.category(),
                error,
                trace: None,
                audit_entry: None,
            });
        }

        let intent = route(request);
        let goal = input
            .goal_override
            .clone()
            .unwrap_or_else(|| intent.goal.predicate());
        let services = Arc::new(self.registry.agent_services(intent.specialist));
        let draft = Arc::new(Mutex::new(AnalysisDraft::default()));
        // Key lifetime is the run: every Arc clone lives inside the run
        // context and executor snapshots, and zeroisation happens when
        // the last clone drops at the end of this call.
        let key = Arc::new(self.registry.crypto().generate_ephemeral_key());

        let ctx = RunContext {
            run_id: run_id.clone(),
            image: Arc::new(input.image_bytes),
            privacy_mode: input.privacy_mode,
            services,
            draft: Arc::clone(&draft),
            key,
            cancel,
        };

        match self
            .engine
            .execute(WorldState::initial(), &goal, ctx, hooks)
            .await
        {
            Ok(trace) => {
                let draft = draft.lock();
                let receipt =
                    draft
                        .audit_receipt
                        .clone()
                        .ok_or_else(|| RunFailure {
                            run_id: run_id.clone(),
                            category: "internal",
                            error: RunError::Internal {
                                reason: "run completed without a ledger receipt".into(),
                            },
                            trace: Some(Box::new(trace.clone())),
                            audit_entry: None,
                        })?;
                let result_payload = draft.encrypted.clone().map(|encrypted| ResultPayload {
                    encrypted,
                    public_summary: draft.public_summary(),
                });
                Ok(RunOutput {
                    run_id,
                    trace,
                    audit_entry: receipt.entry,
                    persistence: receipt.persistence,
                    result_payload,
                })
            }
            Err(engine_error) => Err(RunFailure {
                run_id,
                category: engine_error.error.category(),
                audit_entry: engine_error.halt_receipt.map(|receipt| receipt.entry),
                trace: Some(engine_error.trace),
                error: engine_error.error,
            }),
        }
    }
}
