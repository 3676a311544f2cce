use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::pattern::{PatternId, ReasoningPattern};

const LOG_FILE: &str = "patterns.log";
const IDX_FILE: &str = "patterns.idx";

/// Durable-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// CBOR encoding failure.
    #[error("pattern encoding failed: {0}")]
    Encode(String),
}

/// Append-only pattern log with a sidecar offset index.
///
/// Record framing: unsigned LEB128 payload length, big-endian CRC32 of
/// the payload, CBOR payload with the normalised embedding inlined.
/// Recovery truncates at the first length or checksum mismatch, so a
/// torn tail write loses only the partial record.
pub struct PatternStore {
    log_path: PathBuf,
    idx_path: PathBuf,
    file: File,
    offsets: BTreeMap<PatternId, u64>,
    end_offset: u64,
    flush_interval: Duration,
    last_sync: Instant,
}

impl PatternStore {
    /// Opens (or creates) the store in `dir`, recovering any intact
    /// prefix of an existing log. Returns the store and the recovered
    /// patterns in append order.
    pub fn open(
        dir: impl AsRef<Path>,
        flush_interval: Duration,
    ) -> Result<(Self, Vec<Arc<ReasoningPattern>>), StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let log_path = dir.join(LOG_FILE);
        let idx_path = dir.join(IDX_FILE);

        let bytes = match fs::read(&log_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let (patterns, offsets, valid_end) = Self::recover(&bytes);
        if (valid_end as usize) < bytes.len() {
            // Drop the torn tail before reopening for append.
            let file = OpenOptions::new().write(true).open(&log_path)?;
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let store = Self {
            log_path,
            idx_path,
            file,
            offsets,
            end_offset: valid_end,
            flush_interval,
            last_sync: Instant::now(),
        };
        store.write_idx()?;
        Ok((store, patterns))
    }

    fn recover(bytes: &[u8]) -> (Vec<Arc<ReasoningPattern>>, BTreeMap<PatternId, u64>, u64) {
        let mut patterns = Vec::new();
        let mut offsets = BTreeMap::new();
        let mut cursor = 0usize;
        loop {
            let record_start = cursor;
            let Some((len, consumed)) = decode_varint(&bytes[cursor.min(bytes.len())..]) else {
                break;
            };
            cursor += consumed;
            let len = len as usize;
            if bytes.len() < cursor + 4 + len {
                cursor = record_start;
                break;
            }
            let stored_crc = u32::from_be_bytes([
                bytes[cursor],
                bytes[cursor + 1],
                bytes[cursor + 2],
                bytes[cursor + 3],
            ]);
            cursor += 4;
            let payload = &bytes[cursor..cursor + len];
            if crc32fast::hash(payload) != stored_crc {
                cursor = record_start;
                break;
            }
            let Ok(pattern) = ciborium::de::from_reader::<ReasoningPattern, _>(payload) else {
                cursor = record_start;
                break;
            };
            cursor += len;
            offsets.insert(pattern.id.clone(), record_start as u64);
            patterns.push(Arc::new(pattern));
        }
        (patterns, offsets, cursor as u64)
    }

    /// Appends a sealed pattern. Content addressing makes the append
    /// idempotent: an already-stored id returns its existing offset.
    /// The write is fsync'd immediately when `durable` is set, otherwise
    /// on the bounded flush interval.
    pub fn append(&mut self, pattern: &ReasoningPattern, durable: bool) -> Result<u64, StoreError> {
        if let Some(offset) = self.offsets.get(&pattern.id) {
            return Ok(*offset);
        }
        let mut payload = Vec::new();
        ciborium::ser::into_writer(pattern, &mut payload)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        let mut frame = encode_varint(payload.len() as u64);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        frame.extend_from_slice(&payload);

        let offset = self.end_offset;
        self.file.write_all(&frame)?;
        self.file.flush()?;
        self.end_offset += frame.len() as u64;
        self.offsets.insert(pattern.id.clone(), offset);

        if durable || self.last_sync.elapsed() >= self.flush_interval {
            self.sync()?;
        }
        Ok(offset)
    }

    /// Forces an fsync of the log and a rewrite of the offset index.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_all()?;
        self.write_idx()?;
        self.last_sync = Instant::now();
        Ok(())
    }

    fn write_idx(&self) -> Result<(), StoreError> {
        let index: BTreeMap<&str, u64> = self
            .offsets
            .iter()
            .map(|(id, offset)| (id.as_str(), *offset))
            .collect();
        let data = serde_json::to_vec(&index)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        fs::write(&self.idx_path, data)?;
        Ok(())
    }

    /// Number of stored patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True when nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// True when the id is already stored.
    #[must_use]
    pub fn contains(&self, id: &PatternId) -> bool {
        self.offsets.contains_key(id)
    }

    /// Path of the append-only log.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (idx, byte) in bytes.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7f) << (idx * 7);
        if byte & 0x80 == 0 {
            return Some((value, idx + 1));
        }
    }
    None
}
