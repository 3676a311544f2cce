use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use derma_domain::{AgentId, WorldState};

/// Lifecycle state of one agent invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Dispatched, not yet finished.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed; metadata carries the sanitised error.
    Failed,
    /// Failed under a skip policy; the run continued.
    Skipped,
    /// Cancelled by the per-agent deadline.
    TimedOut,
    /// Cancelled externally.
    Cancelled,
}

impl AgentStatus {
    /// Snake-case label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One agent invocation in the trace. Records are immutable once their
/// status leaves [`AgentStatus::Running`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent dispatched.
    pub agent: AgentId,
    /// Catalogue action name.
    pub action_name: String,
    /// Dispatch time.
    pub start_ts: DateTime<Utc>,
    /// Finish time, absent while running.
    pub end_ts: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: AgentStatus,
    /// Serialised executor metadata, or the sanitised error on failure.
    pub metadata: serde_json::Value,
}

/// Structured record of one run. Appended monotonically; committed
/// records never mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Run identifier.
    pub run_id: String,
    /// Run start.
    pub start_time: DateTime<Utc>,
    /// Run end, set at finalisation.
    pub end_time: Option<DateTime<Utc>>,
    /// Agent invocations in dispatch order.
    pub agents: Vec<AgentRecord>,
    /// World state at finalisation.
    pub final_state: WorldState,
    /// Replans performed.
    pub replans: usize,
}

impl ExecutionTrace {
    /// Starts a trace at the given instant.
    #[must_use]
    pub fn new(run_id: impl Into<String>, start_time: DateTime<Utc>, initial: WorldState) -> Self {
        Self {
            run_id: run_id.into(),
            start_time,
            end_time: None,
            agents: Vec::new(),
            final_state: initial,
            replans: 0,
        }
    }

    /// Appends a running record and returns its index.
    pub fn begin_agent(
        &mut self,
        agent: AgentId,
        action_name: &str,
        start_ts: DateTime<Utc>,
    ) -> usize {
        self.agents.push(AgentRecord {
            agent,
            action_name: action_name.to_string(),
            start_ts,
            end_ts: None,
            status: AgentStatus::Running,
            metadata: serde_json::Value::Null,
        });
        self.agents.len() - 1
    }

    /// Finalises a running record. A record that already left `Running`
    /// is left untouched.
    pub fn finish_agent(
        &mut self,
        index: usize,
        status: AgentStatus,
        metadata: serde_json::Value,
        end_ts: DateTime<Utc>,
    ) {
        if let Some(record) = self.agents.get_mut(index) {
            if record.status == AgentStatus::Running {
                record.status = status;
                record.metadata = metadata;
                record.end_ts = Some(end_ts);
            }
        }
    }

    /// Marks the trace finished with the given final state.
    pub fn finalize(&mut self, final_state: WorldState, end_time: DateTime<Utc>) {
        self.final_state = final_state;
        self.end_time = Some(end_time);
    }

    /// Executed action names in dispatch order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.agents
            .iter()
            .map(|record| record.action_name.as_str())
            .collect()
    }

    /// Number of records with the given status.
    #[must_use]
    pub fn count_with_status(&self, status: AgentStatus) -> usize {
        self.agents
            .iter()
            .filter(|record| record.status == status)
            .count()
    }

    /// Record for the named action, when present.
    #[must_use]
    pub fn record_for(&self, action_name: &str) -> Option<&AgentRecord> {
        self.agents
            .iter()
            .find(|record| record.action_name == action_name)
    }

    /// SHA-256 over the canonical JSON encoding of the trace.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        Sha256::digest(&encoded).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace() -> ExecutionTrace {
        ExecutionTrace::new(
            "run-1",
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            WorldState::initial(),
        )
    }

    #[test]
    fn records_append_and_finish() {
        let mut trace = trace();
        let ts = trace.start_time;
        let idx = trace.begin_agent(AgentId::QualityAssessor, "quality-gate", ts);
        assert_eq!(trace.agents[idx].status, AgentStatus::Running);
        trace.finish_agent(idx, AgentStatus::Completed, json!({"kind": "quality"}), ts);
        assert_eq!(trace.agents[idx].status, AgentStatus::Completed);
        assert!(trace.agents[idx].end_ts.is_some());
    }

    #[test]
    fn finished_records_never_mutate() {
        let mut trace = trace();
        let ts = trace.start_time;
        let idx = trace.begin_agent(AgentId::QualityAssessor, "quality-gate", ts);
        trace.finish_agent(idx, AgentStatus::Completed, json!({"a": 1}), ts);
        trace.finish_agent(idx, AgentStatus::Failed, json!({"b": 2}), ts);
        assert_eq!(trace.agents[idx].status, AgentStatus::Completed);
        assert_eq!(trace.agents[idx].metadata, json!({"a": 1}));
    }

    #[test]
    fn digest_is_content_sensitive() {
        let mut a = trace();
        let b = trace();
        assert_eq!(a.digest(), b.digest());
        a.begin_agent(AgentId::QualityAssessor, "quality-gate", a.start_time);
        assert_ne!(a.digest(), b.digest());
    }
}
