use async_trait::async_trait;
use sha2::{Digest, Sha256};

use derma_audit::EventType;
use derma_domain::AgentId;

use crate::context::ExecutorContext;
use crate::registry::AgentExecutor;
use crate::result::{ExecutorError, ExecutorMetadata, ExecutorResult};

/// Seals the clinical payload under the run's ephemeral key.
pub struct EncryptionExecutor;

#[async_trait]
impl AgentExecutor for EncryptionExecutor {
    fn agent(&self) -> AgentId {
        AgentId::PayloadEncryptor
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        let plaintext = {
            let draft = ctx.draft.lock();
            serde_json::to_vec(&draft.clinical_payload()).map_err(|err| {
                ExecutorError::InternalFault {
                    reason: err.to_string(),
                }
            })?
        };
        let payload = ctx
            .services
            .crypto
            .aes_gcm_encrypt(&ctx.key, &plaintext)
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;
        let metadata = ExecutorMetadata::Encryption {
            algorithm: payload.algorithm.clone(),
            payload_size: payload.payload_size,
        };
        ctx.draft.lock().encrypted = Some(payload);
        Ok(ExecutorResult::of(metadata))
    }
}

/// Appends the run to the audit ledger. Terminal agent of every
/// successful plan; halted runs are committed by the engine instead.
pub struct AuditCommitExecutor;

impl AuditCommitExecutor {
    /// Digest over the run's canonical summary: run id, final world
    /// snapshot, and the clinical payload content.
    fn trace_digest(ctx: &ExecutorContext) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(ctx.run_id.as_bytes());
        hasher.update([0]);
        hasher.update(ctx.world.canonical_encoding().as_bytes());
        hasher.update([0]);
        let payload = ctx.draft.lock().clinical_payload().to_string();
        hasher.update(payload.as_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl AgentExecutor for AuditCommitExecutor {
    fn agent(&self) -> AgentId {
        AgentId::AuditCommitter
    }

    async fn execute(&self, ctx: &ExecutorContext) -> Result<ExecutorResult, ExecutorError> {
        if ctx.draft.lock().encrypted.is_none() {
            return Err(ExecutorError::InternalFault {
                reason: "audit commit dispatched before payload encryption".into(),
            });
        }
        let signals = ctx.draft.lock().safety_signals(false);
        let receipt = ctx
            .services
            .ledger
            .append(
                EventType::AnalysisComplete,
                Self::trace_digest(ctx),
                ctx.image_digest(),
                &signals,
                ctx.services.clock.now_ms(),
                &ctx.run_id,
            )
            .await
            .map_err(|err| ExecutorError::InternalFault {
                reason: err.to_string(),
            })?;
        let metadata = ExecutorMetadata::AuditCommit {
            index: receipt.index,
            safety_level: receipt.entry.safety_level.label().to_string(),
            persistence: format!("{:?}", receipt.persistence).to_lowercase(),
        };
        ctx.draft.lock().audit_receipt = Some(receipt);
        Ok(ExecutorResult::of(metadata))
    }
}
