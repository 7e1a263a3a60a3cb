//! Link hashes and the canonical chained-field encoding.
//!
//! Encoding v1, fed to BLAKE3 in this exact order:
//!
//! | # | field            | bytes                                              |
//! |---|------------------|----------------------------------------------------|
//! | 0 | domain + version | `b"mibsp-ledger-entry"` then `0x01`                |
//! | 1 | `sequence`       | u64 big-endian                                     |
//! | 2 | `timestamp`      | i64 big-endian microseconds since the Unix epoch   |
//! | 3 | `actor`          | role code, then actor id (each length-prefixed)    |
//! | 4 | `action`         | stable action code (length-prefixed)               |
//! | 5 | `subject_ref`    | length-prefixed                                    |
//! | 6 | `detail`         | length-prefixed                                    |
//! | 7 | `prev_link_hash` | 32 raw bytes, all zero for the genesis entry       |
//!
//! Length prefixes are the u32 big-endian byte length of the UTF-8 string.
//! A new field requires a new version byte; entries written under v1 keep
//! hashing under v1.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::entry::{Action, Actor, Detail, SubjectRef};
use crate::error::EntryError;

/// Current canonical encoding version.
pub const CANONICAL_ENCODING_VERSION: u8 = 1;

/// Digest length in bytes.
pub const LINK_HASH_LEN: usize = 32;

const DOMAIN_TAG: &[u8] = b"mibsp-ledger-entry";

/// BLAKE3 digest binding an entry to its predecessor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkHash([u8; LINK_HASH_LEN]);

impl LinkHash {
    /// Sentinel carried as `prev_link_hash` by the genesis entry.
    pub const GENESIS: LinkHash = LinkHash([0; LINK_HASH_LEN]);

    pub const fn from_bytes(bytes: [u8; LINK_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LINK_HASH_LEN] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// First 16 hex characters followed by `...`, for display surfaces.
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        format!("{}...", &hex[..16])
    }
}

impl fmt::Display for LinkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for LinkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkHash({})", self.short())
    }
}

impl FromStr for LinkHash {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s)
            .map(|hash| LinkHash(*hash.as_bytes()))
            .map_err(|_| EntryError::InvalidHash(s.to_string()))
    }
}

impl Serialize for LinkHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LinkHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Borrowed view of the seven chained fields of an entry.
#[derive(Debug, Clone, Copy)]
pub struct ChainedFields<'a> {
    pub sequence: u64,
    pub timestamp: &'a DateTime<Utc>,
    pub actor: &'a Actor,
    pub action: Action,
    pub subject_ref: &'a SubjectRef,
    pub detail: &'a Detail,
    pub prev_link_hash: &'a LinkHash,
}

impl ChainedFields<'_> {
    /// Canonical v1 byte encoding of the chained fields.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut encoder = CanonicalEncoder::new();
        encoder.put_u64(self.sequence);
        encoder.put_i64(self.timestamp.timestamp_micros());
        encoder.put_str(self.actor.role().code());
        encoder.put_str(self.actor.id());
        encoder.put_str(self.action.code());
        encoder.put_str(self.subject_ref.as_str());
        encoder.put_str(self.detail.as_str());
        encoder.put_raw(self.prev_link_hash.as_bytes());
        encoder.finish()
    }

    pub fn link_hash(&self) -> LinkHash {
        LinkHash(*blake3::hash(&self.canonical_bytes()).as_bytes())
    }
}

struct CanonicalEncoder {
    buf: Vec<u8>,
}

impl CanonicalEncoder {
    fn new() -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(DOMAIN_TAG);
        buf.push(CANONICAL_ENCODING_VERSION);
        Self { buf }
    }

    fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_str(&mut self, value: &str) {
        // Field lengths are bounded well below u32::MAX by entry validation.
        let len = value.len() as u32;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}
