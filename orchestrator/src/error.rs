use thiserror::Error;

use derma_audit::{AppendReceipt, LedgerError};
use derma_planning::PlanError;

use crate::trace::ExecutionTrace;

/// Run-level error taxonomy. User-visible output carries only the
/// category label and the run id; raw reasons stay inside the process
/// (logs and trace metadata hold sanitised forms only).
#[derive(Debug, Error)]
pub enum RunError {
    /// Magic-byte check failed, unsupported mime, or oversize input.
    /// Surfaced before planning; no ledger entry is written.
    #[error("invalid artifact: {reason}")]
    InvalidArtifact {
        /// Sanitised reason.
        reason: String,
    },
    /// The planner exhausted its bounds or found no plan.
    #[error(transparent)]
    Planning(#[from] PlanError),
    /// An executor failed under a fatal policy.
    #[error("agent {agent} failed ({category})")]
    ExecutorFailed {
        /// Agent label.
        agent: &'static str,
        /// Sanitised error category.
        category: &'static str,
    },
    /// An executor exceeded the per-agent deadline under a fatal policy.
    #[error("agent {agent} timed out after {timeout_ms} ms")]
    Timeout {
        /// Agent label.
        agent: &'static str,
        /// Configured deadline.
        timeout_ms: u64,
    },
    /// The replan budget was exhausted.
    #[error("replan limit of {limit} exceeded")]
    ReplanExhausted {
        /// Configured budget.
        limit: usize,
    },
    /// The run was cancelled externally.
    #[error("run cancelled")]
    Cancelled,
    /// The halt-path ledger append itself failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Engine-internal invariant violation.
    #[error("internal error: {reason}")]
    Internal {
        /// Sanitised reason.
        reason: String,
    },
}

impl RunError {
    /// Stable category label for user-visible output.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidArtifact { .. } => "invalid_artifact",
            Self::Planning(_) => "planning_failure",
            Self::ExecutorFailed { .. } => "executor_failure",
            Self::Timeout { .. } => "timeout",
            Self::ReplanExhausted { .. } => "replan_exhausted",
            Self::Cancelled => "cancelled",
            Self::Ledger(_) => "persistence_failure",
            Self::Internal { .. } => "internal",
        }
    }
}

/// A halted run: the fatal error plus the finalised trace and, when the
/// halt path could reach the ledger, the `ANALYSIS_HALTED` receipt.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct EngineError {
    /// The fatal error.
    pub error: RunError,
    /// Finalised trace (status reflects the failure).
    pub trace: Box<ExecutionTrace>,
    /// Receipt of the halt entry, absent only when the append failed.
    pub halt_receipt: Option<AppendReceipt>,
}
