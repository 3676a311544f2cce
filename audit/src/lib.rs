#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Hash-chained audit ledger: tamper-evident run attestation with a
//! deterministic safety classifier and best-effort HIGH alerts.

/// Safety classification over the final run payload.
pub mod classifier;
/// Binary entry codec and chain hashing.
pub mod entry;
/// Append-only ledger with bounded-deadline persistence.
pub mod ledger;
/// Best-effort alert capability.
pub mod notifier;

pub use classifier::{classify, SafetySignals};
pub use entry::{
    AuditEntry, EntryDecodeError, EventType, SafetyLevel, ENTRY_LEN, ZERO_DIGEST,
};
pub use ledger::{
    AppendReceipt, AuditLedger, LedgerError, PersistenceState, VerifyReport, APPEND_DEADLINE_MS,
};
pub use notifier::{AlertRecord, EventBusNotifier, Notifier};
