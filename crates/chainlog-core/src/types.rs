//! Shared chain data types for the log-indexing pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PollerError;

/// Width of one EVM-style data word in bytes.
pub const WORD_SIZE: usize = 32;

fn decode_hex_fixed<const N: usize>(s: &str) -> Result<[u8; N], PollerError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.len() != N * 2 {
        return Err(PollerError::InvalidArgument(format!(
            "expected {} hex chars, got {} in {s:?}",
            N * 2,
            hex.len()
        )));
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| PollerError::InvalidArgument(format!("invalid hex in {s:?}")))?;
    }
    Ok(out)
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    s.push_str(&bytes_to_hex(bytes));
    s
}

/// Lowercase hex encoding without a `0x` prefix (storage backends key on
/// fixed-width hex text).
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Inverse of [`bytes_to_hex`]; also accepts a `0x` prefix.
pub fn bytes_from_hex(s: &str) -> Result<Vec<u8>, PollerError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.len() % 2 != 0 {
        return Err(PollerError::InvalidArgument(format!(
            "odd-length hex string {s:?}"
        )));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        out.push(
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| PollerError::InvalidArgument(format!("invalid hex in {s:?}")))?,
        );
    }
    Ok(out)
}

// ─── Address ─────────────────────────────────────────────────────────────────

/// A 20-byte account address (`0x…`, lowercase hex).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_hex(s: &str) -> Result<Self, PollerError> {
        decode_hex_fixed(s).map(Self)
    }

    /// Fill the low-order bytes from `v` — handy for fixtures.
    pub fn from_u64(v: u64) -> Self {
        let mut out = [0u8; 20];
        out[12..].copy_from_slice(&v.to_be_bytes());
        Self(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = PollerError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Hash ────────────────────────────────────────────────────────────────────

/// A 32-byte hash (`0x…`, lowercase hex).
///
/// `Ord` compares the raw bytes, which for a fixed-width value equals
/// big-endian unsigned integer order — topic and data-word range queries
/// rely on this.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_hex(s: &str) -> Result<Self, PollerError> {
        decode_hex_fixed(s).map(Self)
    }

    /// Fill the low-order bytes from `v` — handy for fixtures.
    pub fn from_u64(v: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&v.to_be_bytes());
        Self(out)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl FromStr for Hash {
    type Err = PollerError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── BlockRecord ─────────────────────────────────────────────────────────────

/// One synced block header — enough to verify ancestry and serve
/// confirmation cutoffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block number.
    pub number: i64,
    /// Block hash.
    pub hash: Hash,
    /// Parent block hash.
    pub parent_hash: Hash,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockRecord {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockRecord) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── LogRecord ───────────────────────────────────────────────────────────────

/// An event log emitted within a synced block.
///
/// Uniqueness key: `(block_hash, tx_hash, log_index)`. Keying by block hash
/// rather than number lets records from competing forks coexist transiently;
/// rollback removes the losing fork's logs by block identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub block_number: i64,
    pub block_hash: Hash,
    pub tx_hash: Hash,
    /// Log index within the block.
    pub log_index: i64,
    /// Contract address that emitted the log.
    pub address: Address,
    /// Event signature — always equals `topics[0]`.
    pub event_sig: Hash,
    /// Ordered topic sequence, 1 to 4 entries.
    pub topics: Vec<Hash>,
    /// Opaque event payload.
    pub data: Vec<u8>,
}

impl LogRecord {
    /// Returns the topic at `index` (0 is the event signature).
    pub fn topic(&self, index: usize) -> Option<Hash> {
        self.topics.get(index).copied()
    }

    /// Interprets `data` as consecutive 32-byte big-endian words and returns
    /// the word at `index`, or `None` if the payload is too short.
    pub fn data_word(&self, index: usize) -> Option<Hash> {
        data_word(&self.data, index)
    }
}

/// Extract the 32-byte word at `index` from an opaque payload.
pub fn data_word(data: &[u8], index: usize) -> Option<Hash> {
    let start = index.checked_mul(WORD_SIZE)?;
    let end = start.checked_add(WORD_SIZE)?;
    if data.len() < end {
        return None;
    }
    let mut word = [0u8; WORD_SIZE];
    word.copy_from_slice(&data[start..end]);
    Some(Hash(word))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let a = Address::from_hex("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap();
        assert_eq!(a.to_string(), "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(Address::from_hex(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn hash_rejects_bad_input() {
        assert!(Hash::from_hex("0x1234").is_err()); // too short
        assert!(Hash::from_hex(&format!("0x{}", "zz".repeat(32))).is_err());
    }

    #[test]
    fn hash_ord_is_big_endian_numeric() {
        assert!(Hash::from_u64(1) < Hash::from_u64(2));
        assert!(Hash::from_u64(255) < Hash::from_u64(256));
        let mut high = [0u8; 32];
        high[0] = 1; // 2^248 — larger than any low-order value
        assert!(Hash::from_u64(u64::MAX) < Hash(high));
    }

    #[test]
    fn hash_serde_as_hex_string() {
        let h = Hash::from_u64(0xabcd);
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains("0x"));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn block_extends_parent() {
        let parent = BlockRecord {
            number: 100,
            hash: Hash::from_u64(0xa),
            parent_hash: Hash::from_u64(0x0),
            timestamp: 1000,
        };
        let child = BlockRecord {
            number: 101,
            hash: Hash::from_u64(0xb),
            parent_hash: Hash::from_u64(0xa),
            timestamp: 1012,
        };
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn block_extends_false_on_gap() {
        let a = BlockRecord {
            number: 100,
            hash: Hash::from_u64(0xa),
            parent_hash: Hash::from_u64(0x0),
            timestamp: 1000,
        };
        let b = BlockRecord {
            number: 102, // gap
            hash: Hash::from_u64(0xc),
            parent_hash: Hash::from_u64(0xa),
            timestamp: 1024,
        };
        assert!(!b.extends(&a));
    }

    #[test]
    fn bytes_hex_roundtrip() {
        let data = vec![0x00, 0xff, 0x12];
        let hex = bytes_to_hex(&data);
        assert_eq!(hex, "00ff12");
        assert_eq!(bytes_from_hex(&hex).unwrap(), data);
        assert_eq!(bytes_from_hex("0x00ff12").unwrap(), data);
        assert!(bytes_from_hex("abc").is_err());
    }

    #[test]
    fn data_word_extraction() {
        let mut data = vec![0u8; 64];
        data[31] = 7; // word 0 == 7
        data[63] = 9; // word 1 == 9
        assert_eq!(data_word(&data, 0).unwrap(), Hash::from_u64(7));
        assert_eq!(data_word(&data, 1).unwrap(), Hash::from_u64(9));
        assert!(data_word(&data, 2).is_none());
        assert!(data_word(&[], 0).is_none());
    }
}
