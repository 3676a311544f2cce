use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Size of one binary ledger entry:
/// `prev_hash:32 | trace_digest:32 | image_digest:32 | safety_level:1 | ts:8 | entry_hash:32`.
pub const ENTRY_LEN: usize = 137;

/// `prev_hash` of the genesis entry.
pub const ZERO_DIGEST: [u8; 32] = [0u8; 32];

/// Safety classification stamped on every entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyLevel {
    /// Routine result.
    Low,
    /// Reduced confidence; flagged for review.
    Medium,
    /// Critical finding or failure; raises an out-of-band alert.
    High,
}

impl SafetyLevel {
    /// Wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    /// Decodes the wire byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            _ => None,
        }
    }

    /// Uppercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// What the entry attests to. Carried on the in-memory entry and in
/// telemetry; the fixed binary layout does not include it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// The run finished and produced an encrypted payload.
    AnalysisComplete,
    /// The run was halted by a fatal error.
    AnalysisHalted,
}

impl EventType {
    /// Screaming-snake label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AnalysisComplete => "ANALYSIS_COMPLETE",
            Self::AnalysisHalted => "ANALYSIS_HALTED",
        }
    }
}

/// Binary decode failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntryDecodeError {
    /// Record shorter than [`ENTRY_LEN`].
    #[error("truncated entry: {len} bytes")]
    Truncated {
        /// Bytes available.
        len: usize,
    },
    /// Unknown safety-level byte.
    #[error("invalid safety level byte {byte}")]
    InvalidSafetyLevel {
        /// Offending byte.
        byte: u8,
    },
}

/// One hash-chained ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    /// Hash of the previous entry ([`ZERO_DIGEST`] for the genesis).
    #[serde(with = "hex_digest")]
    pub prev_hash: [u8; 32],
    /// SHA-256 over the canonical execution trace.
    #[serde(with = "hex_digest")]
    pub trace_digest: [u8; 32],
    /// SHA-256 over the input image bytes.
    #[serde(with = "hex_digest")]
    pub image_digest: [u8; 32],
    /// Safety classification.
    pub safety_level: SafetyLevel,
    /// Milliseconds since the Unix epoch.
    pub ts_ms: i64,
    /// `SHA-256(prev ∥ trace ∥ image ∥ level ∥ ts)`.
    #[serde(with = "hex_digest")]
    pub entry_hash: [u8; 32],
    /// Attested event kind (not part of the binary layout).
    pub event_type: EventType,
}

impl AuditEntry {
    /// Builds an entry, computing its chained hash.
    #[must_use]
    pub fn seal(
        prev_hash: [u8; 32],
        trace_digest: [u8; 32],
        image_digest: [u8; 32],
        safety_level: SafetyLevel,
        ts_ms: i64,
        event_type: EventType,
    ) -> Self {
        let entry_hash =
            Self::compute_hash(&prev_hash, &trace_digest, &image_digest, safety_level, ts_ms);
        Self {
            prev_hash,
            trace_digest,
            image_digest,
            safety_level,
            ts_ms,
            entry_hash,
            event_type,
        }
    }

    /// The chained hash over the fixed fields. Timestamps are encoded
    /// big-endian.
    #[must_use]
    pub fn compute_hash(
        prev_hash: &[u8; 32],
        trace_digest: &[u8; 32],
        image_digest: &[u8; 32],
        safety_level: SafetyLevel,
        ts_ms: i64,
    ) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash);
        hasher.update(trace_digest);
        hasher.update(image_digest);
        hasher.update([safety_level.as_byte()]);
        hasher.update(ts_ms.to_be_bytes());
        hasher.finalize().into()
    }

    /// True when `entry_hash` matches the other fields.
    #[must_use]
    pub fn hash_is_consistent(&self) -> bool {
        self.entry_hash
            == Self::compute_hash(
                &self.prev_hash,
                &self.trace_digest,
                &self.image_digest,
                self.safety_level,
                self.ts_ms,
            )
    }

    /// Fixed-size binary encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ENTRY_LEN] {
        let mut out = [0u8; ENTRY_LEN];
        out[0..32].copy_from_slice(&self.prev_hash);
        out[32..64].copy_from_slice(&self.trace_digest);
        out[64..96].copy_from_slice(&self.image_digest);
        out[96] = self.safety_level.as_byte();
        out[97..105].copy_from_slice(&self.ts_ms.to_be_bytes());
        out[105..137].copy_from_slice(&self.entry_hash);
        out
    }

    /// Decodes one fixed-size record. `event_type` is not carried in the
    /// binary layout and defaults to [`EventType::AnalysisComplete`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EntryDecodeError> {
        if bytes.len() < ENTRY_LEN {
            return Err(EntryDecodeError::Truncated { len: bytes.len() });
        }
        let mut prev_hash = [0u8; 32];
        let mut trace_digest = [0u8; 32];
        let mut image_digest = [0u8; 32];
        let mut entry_hash = [0u8; 32];
        prev_hash.copy_from_slice(&bytes[0..32]);
        trace_digest.copy_from_slice(&bytes[32..64]);
        image_digest.copy_from_slice(&bytes[64..96]);
        let safety_level = SafetyLevel::from_byte(bytes[96])
            .ok_or(EntryDecodeError::InvalidSafetyLevel { byte: bytes[96] })?;
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[97..105]);
        entry_hash.copy_from_slice(&bytes[105..137]);
        Ok(Self {
            prev_hash,
            trace_digest,
            image_digest,
            safety_level,
            ts_ms: i64::from_be_bytes(ts_bytes),
            entry_hash,
            event_type: EventType::AnalysisComplete,
        })
    }
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditEntry {
        AuditEntry::seal(
            ZERO_DIGEST,
            [1u8; 32],
            [2u8; 32],
            SafetyLevel::Medium,
            1_700_000_000_000,
            EventType::AnalysisComplete,
        )
    }

    #[test]
    fn binary_round_trip() {
        let entry = sample();
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), ENTRY_LEN);
        let decoded = AuditEntry::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.prev_hash, entry.prev_hash);
        assert_eq!(decoded.trace_digest, entry.trace_digest);
        assert_eq!(decoded.safety_level, entry.safety_level);
        assert_eq!(decoded.ts_ms, entry.ts_ms);
        assert_eq!(decoded.entry_hash, entry.entry_hash);
        assert!(decoded.hash_is_consistent());
    }

    #[test]
    fn corrupting_any_field_breaks_the_hash() {
        let entry = sample();
        let mut bytes = entry.to_bytes();
        bytes[40] ^= 0x01;
        let decoded = AuditEntry::from_bytes(&bytes).unwrap();
        assert!(!decoded.hash_is_consistent());
    }

    #[test]
    fn invalid_safety_byte_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[96] = 9;
        assert_eq!(
            AuditEntry::from_bytes(&bytes).unwrap_err(),
            EntryDecodeError::InvalidSafetyLevel { byte: 9 }
        );
    }

    #[test]
    fn json_encoding_uses_hex_digests() {
        let value = serde_json::to_value(sample()).unwrap();
        let prev = value.get("prev_hash").unwrap().as_str().unwrap();
        assert_eq!(prev.len(), 64);
        assert!(prev.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
