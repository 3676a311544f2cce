use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use derma_audit::AuditLedger;
use derma_domain::WorldState;
use derma_reasoning::{Embedder, ReasoningBank};

use crate::contracts::{Clock, Generator, IdSource, VisionSpecialist};
use crate::crypto::{Crypto, EphemeralKey};
use crate::draft::AnalysisDraft;

/// Cooperative cancellation, one pair per executor invocation. The
/// engine triggers it on timeout, caller abort, or shutdown; executors
/// must observe it at their own suspension points and return promptly,
/// discarding partial work.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
    keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelSignal {
    /// A signal that never fires (tests and synchronous tools).
    #[must_use]
    pub fn never() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            receiver,
            keepalive: Some(Arc::new(sender)),
        }
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// True when this signal can still fire.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.keepalive.is_none()
    }
}

/// Cancellation trigger held by the engine.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Creates a handle and its observing signal.
    #[must_use]
    pub fn new() -> (Self, CancelSignal) {
        let (sender, receiver) = watch::channel(false);
        (
            Self { sender },
            CancelSignal {
                receiver,
                keepalive: None,
            },
        )
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// Tuning thresholds surfaced to executors from run configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentTuning {
    /// Confidence below this marks the run low-confidence.
    pub confidence_low_threshold: f32,
    /// Effective decision threshold under safety calibration.
    pub safety_calibration_threshold: f32,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            confidence_low_threshold: 0.65,
            safety_calibration_threshold: 0.5,
        }
    }
}

/// Shared service handles injected into every run. Replaces the
/// process-wide singletons of older revisions: the registry owns the
/// reasoning-bank and ledger handles, both internally synchronised.
pub struct AgentServices {
    /// Process-wide reasoning memory.
    pub bank: Arc<ReasoningBank>,
    /// Process-wide audit ledger.
    pub ledger: Arc<AuditLedger>,
    /// Primary text generator (typically remote).
    pub generator: Arc<dyn Generator>,
    /// Offline fallback generator.
    pub fallback_generator: Arc<dyn Generator>,
    /// Vision specialist bound by the router.
    pub vision: Arc<dyn VisionSpecialist>,
    /// Text embedder matching the bank dimension.
    pub embedder: Arc<dyn Embedder>,
    /// Cryptographic primitives.
    pub crypto: Arc<dyn Crypto>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Identifier source.
    pub ids: Arc<dyn IdSource>,
}

/// Bounded view of a run handed to one executor invocation: the current
/// world snapshot, the run's shared draft, service handles, and the
/// invocation's cancellation signal.
pub struct ExecutorContext {
    /// Run identifier.
    pub run_id: String,
    /// World-state snapshot at dispatch time.
    pub world: WorldState,
    /// Input image bytes.
    pub image: Arc<Vec<u8>>,
    /// Whether the operator requested privacy mode (restricts what the
    /// learning agent stores).
    pub privacy_mode: bool,
    /// Shared service handles.
    pub services: Arc<AgentServices>,
    /// Tuning thresholds.
    pub tuning: AgentTuning,
    /// The run's analysis scratchpad.
    pub draft: Arc<Mutex<AnalysisDraft>>,
    /// The run's ephemeral encryption key.
    pub key: Arc<EphemeralKey>,
    /// Cooperative cancellation for this invocation.
    pub cancel: CancelSignal,
}

impl ExecutorContext {
    /// SHA-256 digest of the input image.
    #[must_use]
    pub fn image_digest(&self) -> [u8; 32] {
        self.services.crypto.sha256(&self.image)
    }
}
