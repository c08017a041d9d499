//! Core data model.
//!
//! A work item is one (location, treatment) pair in the ledger. Its
//! location hash orders and partitions the keyspace; its content hash
//! decides whether an enqueue re-activates finished work.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Location Hash
// ---------------------------------------------------------------------------

/// Width of every rendered hash, in hex characters.
pub const HASH_HEX_LEN: usize = 64;

/// SHA-256 of a location, always 64 lower-case hex characters.
///
/// All ordering, cursor, and shard comparisons happen on this canonical
/// text form, so lexicographic order equals numeric order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationHash(String);

impl LocationHash {
    /// Build from raw digest bytes (32 bytes for SHA-256).
    pub(crate) fn from_digest(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len() * 2, HASH_HEX_LEN);
        Self(hex::encode(bytes))
    }

    /// Parse a user-supplied hash. Upper-case input is folded; anything that
    /// is not exactly 64 hex digits is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != HASH_HEX_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::validation(format!(
                "hash must be {HASH_HEX_LEN} hex characters, got {raw:?}"
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    /// The all-zero hash; sorts before every location.
    pub fn min() -> Self {
        Self("0".repeat(HASH_HEX_LEN))
    }

    /// The all-`f` hash; no location sorts after it.
    pub fn max() -> Self {
        Self("f".repeat(HASH_HEX_LEN))
    }

    /// Render a 64-bit prefix as a full-width hash with zeroed low bits.
    pub fn from_prefix(prefix: u64) -> Self {
        Self(format!("{prefix:016x}{}", "0".repeat(HASH_HEX_LEN - 16)))
    }

    /// The leading 64 bits as an unsigned integer.
    pub fn prefix_u64(&self) -> u64 {
        // Construction guarantees 64 hex digits.
        u64::from_str_radix(&self.0[..16], 16).unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocationHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LocationHash {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<LocationHash> for String {
    fn from(hash: LocationHash) -> Self {
        hash.0
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Prefix marking a cursor that is not a well-formed location hash.
const RAW_CURSOR_PREFIX: &str = "raw:";

/// Exclusive lower bound for a claim walk, compared as text against stored
/// location hashes.
///
/// Usually a [`LocationHash`]. A walk that ends on an undecodable row
/// carries that row's stored text instead, so the next call starts past it;
/// such a cursor renders as `raw:<text>` and parses back from that form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cursor(String);

impl Cursor {
    /// Parse a user-supplied cursor: a 64-hex hash, or `raw:<text>`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().strip_prefix(RAW_CURSOR_PREFIX) {
            Some("") => Err(Error::validation("raw cursor is empty")),
            Some(text) => Ok(Self(text.to_string())),
            None => LocationHash::parse(raw).map(Self::from),
        }
    }

    /// Cursor from a stored `location_hash` value, decodable or not.
    pub(crate) fn from_stored(text: String) -> Self {
        Self(text)
    }

    /// The text compared against stored hashes.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_hash(&self) -> bool {
        self.0.len() == HASH_HEX_LEN && self.0.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl From<LocationHash> for Cursor {
    fn from(hash: LocationHash) -> Self {
        Self(hash.0)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_hash() {
            f.write_str(&self.0)
        } else {
            write!(f, "{RAW_CURSOR_PREFIX}{}", self.0)
        }
    }
}

impl TryFrom<String> for Cursor {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.to_string()
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One tracked (location, treatment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Absolute, normalized location (usually a file path).
    pub location: String,

    /// Ordering and partitioning key. Never changes once inserted.
    pub location_hash: LocationHash,

    /// Digest of the content at last enqueue.
    pub content_hash: String,

    /// Kind of processing; the ledger is partitioned by it.
    pub treatment: String,

    /// `None` while pending.
    pub completed_at: Option<DateTime<Utc>>,

    /// Opaque value recorded by the completing worker.
    pub result: Option<String>,

    /// When a completed item becomes claimable again.
    pub next_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn is_pending(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Completed, with a revisit time at or before `now`.
    pub fn is_revisit_due(&self, now: DateTime<Utc>) -> bool {
        self.completed_at.is_some() && self.next_at.is_some_and(|next| next <= now)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Per-treatment counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub treatment: String,
    pub pending: u64,
    pub done: u64,
    /// Done items whose revisit time has passed (claimable again).
    pub due: u64,
}

/// Result of a status query: one row per treatment, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub rows: Vec<StatusRow>,
}

impl StatusReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sum over all rows, labelled `TOTAL`.
    pub fn total(&self) -> StatusRow {
        self.rows.iter().fold(
            StatusRow {
                treatment: "TOTAL".to_string(),
                pending: 0,
                done: 0,
                due: 0,
            },
            |mut acc, row| {
                acc.pending += row.pending;
                acc.done += row.done;
                acc.due += row.due;
                acc
            },
        )
    }

    pub fn get(&self, treatment: &str) -> Option<&StatusRow> {
        self.rows.iter().find(|r| r.treatment == treatment)
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Canonical stored form of an instant: RFC 3339, UTC, microseconds, `Z`.
///
/// One fixed width keeps SQL text comparison chronological.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("invalid timestamp {raw:?}: {e}")))
}
