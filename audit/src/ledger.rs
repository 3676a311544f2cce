use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::classifier::{classify, SafetySignals};
use crate::entry::{AuditEntry, EventType, SafetyLevel, ENTRY_LEN, ZERO_DIGEST};
use crate::notifier::{AlertRecord, Notifier};

/// Deadline for synchronous persistence of an append.
pub const APPEND_DEADLINE_MS: u64 = 2_000;

/// Ledger failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether an append reached disk within its deadline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceState {
    /// Entry fsync'd before `append` returned.
    Persisted,
    /// Entry held in the in-memory queue; flushed on the next
    /// successful append.
    Degraded,
}

/// Result of an append.
#[derive(Debug, Clone)]
pub struct AppendReceipt {
    /// The sealed entry.
    pub entry: AuditEntry,
    /// Zero-based position in the chain.
    pub index: u64,
    /// Persistence outcome.
    pub persistence: PersistenceState,
}

/// Chain verification summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyReport {
    /// Entries present on disk.
    pub total: u64,
    /// First entry whose hash or linkage fails; all later entries are
    /// transitively invalid.
    pub first_invalid: Option<u64>,
}

impl VerifyReport {
    /// True when every entry verifies.
    #[must_use]
    pub const fn is_intact(&self) -> bool {
        self.first_invalid.is_none()
    }
}

struct LedgerInner {
    head: [u8; 32],
    next_index: u64,
    pending: Vec<(u64, [u8; ENTRY_LEN])>,
}

/// Hash-chained append-only ledger over fixed-size binary entries.
///
/// Appends serialise on one lock; the chain head is read-modify-written
/// under it. Persistence is attempted synchronously with a bounded
/// deadline; a slow disk degrades the append instead of blocking the
/// run, and degraded entries ride along with the next successful
/// append. Entry bytes are written at their index-derived offset, so a
/// straggling write that loses the deadline race rewrites identical
/// bytes and cannot corrupt the file.
pub struct AuditLedger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
    notifier: Option<Arc<dyn Notifier>>,
    logger: Option<Arc<JsonLogger>>,
}

impl AuditLedger {
    /// Opens (or creates) the ledger at `path`, recovering the chain
    /// head from the last complete on-disk entry. A torn trailing write
    /// is discarded; tampered full entries are preserved for
    /// [`Self::verify`] to report.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let complete = bytes.len() / ENTRY_LEN;
        if bytes.len() % ENTRY_LEN != 0 {
            let file = OpenOptions::new().create(true).write(true).open(&path)?;
            file.set_len((complete * ENTRY_LEN) as u64)?;
            file.sync_all()?;
        }
        let head = if complete == 0 {
            ZERO_DIGEST
        } else {
            let start = (complete - 1) * ENTRY_LEN;
            let mut head = [0u8; 32];
            head.copy_from_slice(&bytes[start + 105..start + 137]);
            head
        };
        Ok(Self {
            path,
            inner: Mutex::new(LedgerInner {
                head,
                next_index: complete as u64,
                pending: Vec::new(),
            }),
            notifier: None,
            logger: None,
        })
    }

    /// Attaches the best-effort alert capability.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Attaches a structured logger for degraded-persistence warnings.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<JsonLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Appends one entry. The safety level is classified from the final
    /// payload signals; HIGH entries raise a best-effort alert after the
    /// append. The receipt reports whether persistence met its deadline.
    pub async fn append(
        &self,
        event_type: EventType,
        trace_digest: [u8; 32],
        image_digest: [u8; 32],
        signals: &SafetySignals,
        ts_ms: i64,
        analysis_id: &str,
    ) -> Result<AppendReceipt, LedgerError> {
        let safety_level = classify(signals);
        let (entry, index, persistence) = {
            let mut inner = self.inner.lock().await;
            let entry = AuditEntry::seal(
                inner.head,
                trace_digest,
                image_digest,
                safety_level,
                ts_ms,
                event_type,
            );
            inner.head = entry.entry_hash;
            let index = inner.next_index;
            inner.next_index += 1;
            inner.pending.push((index, entry.to_bytes()));

            let batch = inner.pending.clone();
            let persist = Self::persist(self.path.clone(), batch);
            let persistence = match tokio::time::timeout(
                Duration::from_millis(APPEND_DEADLINE_MS),
                persist,
            )
            .await
            {
                Ok(Ok(())) => {
                    inner.pending.clear();
                    PersistenceState::Persisted
                }
                Ok(Err(err)) => {
                    self.log_degraded(analysis_id, index, &err.to_string());
                    PersistenceState::Degraded
                }
                Err(_) => {
                    self.log_degraded(analysis_id, index, "persistence deadline exceeded");
                    PersistenceState::Degraded
                }
            };
            (entry, index, persistence)
        };

        if safety_level == SafetyLevel::High {
            if let Some(notifier) = &self.notifier {
                let ts = Utc
                    .timestamp_millis_opt(ts_ms)
                    .single()
                    .unwrap_or_else(Utc::now);
                let alert = AlertRecord {
                    analysis_id: analysis_id.to_string(),
                    safety_level,
                    summary: format!("ledger entry {index} classified HIGH"),
                    ts,
                };
                if let Err(err) = notifier.alert(alert).await {
                    self.log(
                        LogLevel::Warn,
                        "audit.alert.failed",
                        json!({ "analysis_id": analysis_id, "error": err.to_string() }),
                    );
                }
            }
        }

        Ok(AppendReceipt {
            entry,
            index,
            persistence,
        })
    }

    async fn persist(
        path: PathBuf,
        batch: Vec<(u64, [u8; ENTRY_LEN])>,
    ) -> Result<(), std::io::Error> {
        tokio::task::spawn_blocking(move || {
            let mut file = OpenOptions::new().create(true).write(true).open(&path)?;
            for (index, bytes) in batch {
                file.seek(SeekFrom::Start(index * ENTRY_LEN as u64))?;
                file.write_all(&bytes)?;
            }
            file.sync_all()
        })
        .await
        .map_err(|_| std::io::Error::other("persistence task aborted"))?
    }

    /// Current chain head.
    pub async fn head(&self) -> [u8; 32] {
        self.inner.lock().await.head
    }

    /// Number of appended entries (including any still in the degraded
    /// queue).
    pub async fn len(&self) -> u64 {
        self.inner.lock().await.next_index
    }

    /// Verifies the on-disk chain.
    pub fn verify(&self) -> Result<VerifyReport, LedgerError> {
        Self::verify_file(&self.path)
    }

    /// Verifies an arbitrary ledger file: every entry's hash must match
    /// its fields and every `prev_hash` must equal the previous entry's
    /// hash. Corrupting one byte of entry `n` invalidates entries
    /// `n..total`.
    pub fn verify_file(path: impl AsRef<Path>) -> Result<VerifyReport, LedgerError> {
        let bytes = match fs::read(path.as_ref()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let total = (bytes.len() / ENTRY_LEN) as u64;
        let mut prev = ZERO_DIGEST;
        for index in 0..total {
            let start = (index as usize) * ENTRY_LEN;
            let record = &bytes[start..start + ENTRY_LEN];
            let Ok(entry) = AuditEntry::from_bytes(record) else {
                return Ok(VerifyReport {
                    total,
                    first_invalid: Some(index),
                });
            };
            if entry.prev_hash != prev || !entry.hash_is_consistent() {
                return Ok(VerifyReport {
                    total,
                    first_invalid: Some(index),
                });
            }
            prev = entry.entry_hash;
        }
        Ok(VerifyReport {
            total,
            first_invalid: None,
        })
    }

    /// Ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn log_degraded(&self, analysis_id: &str, index: u64, reason: &str) {
        self.log(
            LogLevel::Warn,
            "audit.persistence.degraded",
            json!({ "analysis_id": analysis_id, "index": index, "reason": reason }),
        );
    }

    fn log(&self, level: LogLevel, message: &str, metadata: serde_json::Value) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(&LogRecord::new("audit", level, message).with_metadata(metadata));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::EventBusNotifier;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    fn low_signals() -> SafetySignals {
        SafetySignals {
            critical_error: false,
            primary_lesion: Some("Benign Nevus".into()),
            risk_label: Some("Low".into()),
            confidence_score: 0.95,
        }
    }

    async fn append_n(ledger: &AuditLedger, n: u64) {
        for i in 0..n {
            ledger
                .append(
                    EventType::AnalysisComplete,
                    [u8::try_from(i % 251).unwrap(); 32],
                    [7u8; 32],
                    &low_signals(),
                    1_700_000_000_000 + i64::try_from(i).unwrap(),
                    &format!("run-{i}"),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn appends_chain_and_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let ledger = AuditLedger::open(&path).unwrap();
        append_n(&ledger, 3).await;
        assert_eq!(ledger.len().await, 3);
        let report = ledger.verify().unwrap();
        assert_eq!(report.total, 3);
        assert!(report.is_intact());
        assert_eq!(fs::read(&path).unwrap().len(), 3 * ENTRY_LEN);
    }

    #[tokio::test]
    async fn genesis_entry_links_to_zero_digest() {
        let dir = tempdir().unwrap();
        let ledger = AuditLedger::open(dir.path().join("audit.log")).unwrap();
        let receipt = ledger
            .append(
                EventType::AnalysisComplete,
                [1u8; 32],
                [2u8; 32],
                &low_signals(),
                1_700_000_000_000,
                "run-0",
            )
            .await
            .unwrap();
        assert_eq!(receipt.entry.prev_hash, ZERO_DIGEST);
        assert_eq!(receipt.persistence, PersistenceState::Persisted);
    }

    #[tokio::test]
    async fn head_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let first_head;
        {
            let ledger = AuditLedger::open(&path).unwrap();
            append_n(&ledger, 2).await;
            first_head = ledger.head().await;
        }
        let reopened = AuditLedger::open(&path).unwrap();
        assert_eq!(reopened.head().await, first_head);
        assert_eq!(reopened.len().await, 2);
        append_n(&reopened, 1).await;
        assert!(reopened.verify().unwrap().is_intact());
    }

    #[tokio::test]
    async fn tampering_invalidates_suffix_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let ledger = AuditLedger::open(&path).unwrap();
        append_n(&ledger, 4).await;

        let mut bytes = fs::read(&path).unwrap();
        // Flip one byte inside entry 2's trace digest.
        bytes[2 * ENTRY_LEN + 40] ^= 0x01;
        fs::write(&path, &bytes).unwrap();

        let report = AuditLedger::verify_file(&path).unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.first_invalid, Some(2));
    }

    #[tokio::test]
    async fn high_entries_raise_one_alert() {
        let dir = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(8));
        let ledger = AuditLedger::open(dir.path().join("audit.log"))
            .unwrap()
            .with_notifier(Arc::new(EventBusNotifier::new(bus.clone())));
        let signals = SafetySignals {
            critical_error: true,
            ..SafetySignals::default()
        };
        let receipt = ledger
            .append(
                EventType::AnalysisHalted,
                [1u8; 32],
                [2u8; 32],
                &signals,
                1_700_000_000_000,
                "run-high",
            )
            .await
            .unwrap();
        assert_eq!(receipt.entry.safety_level, SafetyLevel::High);
        assert_eq!(bus.snapshot_of("audit.alert.high").len(), 1);
    }

    #[tokio::test]
    async fn torn_tail_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        {
            let ledger = AuditLedger::open(&path).unwrap();
            append_n(&ledger, 2).await;
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0xAAu8; 50]);
        fs::write(&path, &bytes).unwrap();

        let ledger = AuditLedger::open(&path).unwrap();
        assert_eq!(ledger.len().await, 2);
        assert_eq!(fs::read(&path).unwrap().len(), 2 * ENTRY_LEN);
        assert!(ledger.verify().unwrap().is_intact());
    }
}
