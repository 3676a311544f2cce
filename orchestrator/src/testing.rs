//! Test fixtures: scripted capabilities and temp-backed services for
//! engine and run tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use derma_agents::{
    AgentServices, AnalysisDraft, CancelSignal, Classification, Crypto, ExecutorRegistry,
    LocalTemplateGenerator, SpecialistKind, StdCrypto, SystemClock, UnavailableGenerator,
    UuidSource, VisionError, VisionSpecialist,
};
use derma_audit::AuditLedger;
use derma_domain::ActionCatalogue;
use derma_reasoning::{BankConfig, HashingEmbedder, ReasoningBank};

use crate::config::OrchestratorConfig;
use crate::engine::{ExecutionEngine, RunContext};

/// Vision stub returning fixed scores, for scenario tests.
pub(crate) struct ScriptedVision {
    tone_confidence: f32,
    lesion: (&'static str, f32),
}

impl ScriptedVision {
    pub(crate) fn confident() -> Self {
        Self {
            tone_confidence: 0.95,
            lesion: ("Benign Nevus", 0.95),
        }
    }

    pub(crate) fn uncertain() -> Self {
        Self {
            tone_confidence: 0.45,
            lesion: ("Benign Nevus", 0.8),
        }
    }

    pub(crate) fn melanoma() -> Self {
        Self {
            tone_confidence: 0.9,
            lesion: ("Melanoma", 0.88),
        }
    }
}

#[async_trait]
impl VisionSpecialist for ScriptedVision {
    fn kind(&self) -> SpecialistKind {
        SpecialistKind::Dermoscopy
    }

    async fn classify(&self, _image: &[u8]) -> Result<Vec<Classification>, VisionError> {
        Ok(vec![
            Classification {
                label: "fitzpatrick:III".into(),
                score: self.tone_confidence,
            },
            Classification {
                label: format!("lesion:{}", self.lesion.0),
                score: self.lesion.1,
            },
        ])
    }

    async fn heatmap(&self, _image: &[u8]) -> Result<Vec<u8>, VisionError> {
        Ok(vec![0u8; 128])
    }
}

pub(crate) async fn scripted_services(vision: ScriptedVision) -> Arc<AgentServices> {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();
    std::mem::forget(dir);

    let config = OrchestratorConfig::default();
    let bank = ReasoningBank::open(
        base.join("bank"),
        Arc::new(HashingEmbedder::new(config.reasoning_bank_dimension)),
        BankConfig {
            dimension: config.reasoning_bank_dimension,
            ..BankConfig::default()
        },
    )
    .unwrap();
    let ledger = AuditLedger::open(base.join("audit.log")).unwrap();

    Arc::new(AgentServices {
        bank: Arc::new(bank),
        ledger: Arc::new(ledger),
        generator: Arc::new(UnavailableGenerator),
        fallback_generator: Arc::new(LocalTemplateGenerator),
        vision: Arc::new(vision),
        embedder: Arc::new(HashingEmbedder::new(config.reasoning_bank_dimension)),
        crypto: Arc::new(StdCrypto),
        clock: Arc::new(SystemClock),
        ids: Arc::new(UuidSource),
    })
}

pub(crate) fn test_engine(
    registry: ExecutorRegistry,
    config: OrchestratorConfig,
) -> ExecutionEngine {
    ExecutionEngine::new(
        Arc::new(ActionCatalogue::dermatology().unwrap()),
        registry,
        config,
    )
    .unwrap()
}

pub(crate) fn test_run_context(services: &Arc<AgentServices>) -> RunContext {
    RunContext {
        run_id: "run-test".into(),
        image: Arc::new(b"\xff\xd8\xff\xe0 jpeg body".to_vec()),
        privacy_mode: false,
        services: Arc::clone(services),
        draft: Arc::new(Mutex::new(AnalysisDraft::default())),
        key: Arc::new(StdCrypto.generate_ephemeral_key()),
        cancel: CancelSignal::never(),
    }
}
