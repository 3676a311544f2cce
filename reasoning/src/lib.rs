#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Durable reasoning-pattern bank: append-only pattern storage with
//! embedding similarity search, shared process-wide by analysis runs.

/// Bank facade combining store, index, and embedder.
pub mod bank;
/// Embedding capability and the deterministic local embedder.
pub mod embedder;
/// In-memory similarity index.
pub mod index;
/// Pattern records and content addressing.
pub mod pattern;
/// Append-only durable store with crash recovery.
pub mod store;

pub use bank::{BankConfig, BankError, ReasoningBank, SearchQuery};
pub use embedder::{EmbedError, Embedder, HashingEmbedder};
pub use index::{SearchFilter, SearchHit, VectorIndex};
pub use pattern::{PatternDraft, PatternId, PatternMetadata, ReasoningPattern};
pub use store::{PatternStore, StoreError};
