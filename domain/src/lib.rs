#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! World-state alphabet, action records, and the validated dermatology
//! action catalogue shared by the planner and the execution engine.

/// Action records, agent identifiers, and state deltas.
pub mod action;
/// Catalogue construction and startup validation.
pub mod catalogue;
/// Goal and precondition predicates.
pub mod predicate;
/// Typed world-state snapshot over the closed key alphabet.
pub mod state;

pub use action::{Action, ActionBuilder, AgentId, FailurePolicy, StateDelta};
pub use catalogue::{
    canonical_goal, full_analysis_goal, screening_goal, ActionCatalogue, CatalogueError,
};
pub use predicate::{Clause, CompareOp, Predicate};
pub use state::{Fitzpatrick, Score, StateError, StateKey, StateValue, ValueDomain, WorldState};
