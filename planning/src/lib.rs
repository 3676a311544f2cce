#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Deterministic A* planning over the analysis world state.

/// Plan value object and soundness replay.
pub mod plan;
/// A* search with expansion and deadline bounds.
pub mod planner;

pub use plan::{Plan, PlanViolation};
pub use planner::{PlanError, Planner, PlannerConfig};
