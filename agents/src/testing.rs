//! Test fixtures: a fully wired executor context over temp-backed
//! shared services and deterministic capabilities.

use std::sync::Arc;

use parking_lot::Mutex;

use derma_audit::AuditLedger;
use derma_domain::WorldState;
use derma_reasoning::{BankConfig, HashingEmbedder, ReasoningBank};

use crate::context::{AgentServices, AgentTuning, CancelSignal, ExecutorContext};
use crate::contracts::{
    FixedClock, HeuristicVisionSpecialist, LocalTemplateGenerator, SequentialIdSource,
    SpecialistKind, UnavailableGenerator,
};
use crate::crypto::{Crypto, StdCrypto};
use crate::draft::AnalysisDraft;

pub(crate) const TEST_DIMENSION: usize = 64;

pub(crate) async fn test_context(image: Vec<u8>) -> ExecutorContext {
    test_context_with(image, WorldState::initial()).await
}

pub(crate) async fn test_context_with(image: Vec<u8>, world: WorldState) -> ExecutorContext {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();
    // The context outlives this function; keep the directory around for
    // the remainder of the test process.
    std::mem::forget(dir);

    let bank = ReasoningBank::open(
        base.join("bank"),
        Arc::new(HashingEmbedder::new(TEST_DIMENSION)),
        BankConfig {
            dimension: TEST_DIMENSION,
            ..BankConfig::default()
        },
    )
    .unwrap();
    let ledger = AuditLedger::open(base.join("audit.log")).unwrap();

    let services = AgentServices {
        bank: Arc::new(bank),
        ledger: Arc::new(ledger),
        generator: Arc::new(UnavailableGenerator),
        fallback_generator: Arc::new(LocalTemplateGenerator),
        vision: Arc::new(HeuristicVisionSpecialist::new(SpecialistKind::Dermoscopy)),
        embedder: Arc::new(HashingEmbedder::new(TEST_DIMENSION)),
        crypto: Arc::new(StdCrypto),
        clock: Arc::new(FixedClock::new(1_700_000_000_000)),
        ids: Arc::new(SequentialIdSource::default()),
    };

    ExecutorContext {
        run_id: "run-test".into(),
        world,
        image: Arc::new(image),
        privacy_mode: false,
        services: Arc::new(services),
        tuning: AgentTuning::default(),
        draft: Arc::new(Mutex::new(AnalysisDraft::default())),
        key: Arc::new(StdCrypto.generate_ephemeral_key()),
        cancel: CancelSignal::never(),
    }
}
