#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Analysis agents: capability contracts, the closed executor registry,
//! and the sixteen executors the execution engine dispatches.

/// Executor context, cancellation, and shared service handles.
pub mod context;
/// Abstract capabilities (generator, vision, clock, ids) and local
/// bindings.
pub mod contracts;
/// Crypto primitives and the run-scoped ephemeral key.
pub mod crypto;
/// Per-run analysis scratchpad.
pub mod draft;
/// The agent executors.
pub mod executors;
/// Executor trait and registry.
pub mod registry;
/// Executor results, metadata union, and error classes.
pub mod result;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{AgentServices, AgentTuning, CancelHandle, CancelSignal, ExecutorContext};
pub use contracts::{
    Classification, Clock, FixedClock, Generator, GeneratorError, HeuristicVisionSpecialist,
    IdSource, LocalTemplateGenerator, SequentialIdSource, SpecialistKind, SystemClock,
    UnavailableGenerator, UuidSource, VisionError, VisionSpecialist,
};
pub use crypto::{Crypto, CryptoError, EncryptedPayload, EphemeralKey, StdCrypto, AES_GCM_256};
pub use draft::{AnalysisDraft, LesionFinding, RiskLabel};
pub use registry::{AgentExecutor, ExecutorRegistry};
pub use result::{CalibrationMode, ExecutorError, ExecutorMetadata, ExecutorResult};
