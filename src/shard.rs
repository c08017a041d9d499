//! Deterministic partitioning of the location-hash space.
//!
//! The leading 64 bits of a location hash are split into `total` contiguous
//! slices. Shard `i` owns `[floor(i * 2^64 / total), floor((i+1) * 2^64 / total))`,
//! rendered back to full-width hashes so the store can compare them as text.
//! The last shard ends inclusively at the all-`f` hash, which keeps the upper
//! bound representable and covers every hash with prefix `ffffffffffffffff`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::model::LocationHash;

/// Which slice of the hash space a claimant owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardSpec {
    index: u64,
    total: u64,
}

impl ShardSpec {
    /// Validate `0 <= index < total`.
    pub fn new(index: u64, total: u64) -> Result<Self> {
        if total == 0 {
            return Err(Error::validation("total shards must be at least 1"));
        }
        if index >= total {
            return Err(Error::validation(format!(
                "shard index {index} out of range for {total} shards"
            )));
        }
        Ok(Self { index, total })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }

    /// The hash range owned by this shard.
    pub fn range(&self) -> ShardRange {
        let start = LocationHash::from_prefix(boundary(self.index, self.total));
        if self.is_last() {
            ShardRange {
                start,
                end: LocationHash::max(),
                end_inclusive: true,
            }
        } else {
            ShardRange {
                start,
                end: LocationHash::from_prefix(boundary(self.index + 1, self.total)),
                end_inclusive: false,
            }
        }
    }

    /// Index of the shard that owns `hash` when the space is cut `total` ways.
    pub fn shard_of(hash: &LocationHash, total: u64) -> Result<u64> {
        if total == 0 {
            return Err(Error::validation("total shards must be at least 1"));
        }
        // Largest i with boundary(i) <= prefix. The estimate never overshoots;
        // flooring can leave it one short.
        let prefix = hash.prefix_u64() as u128;
        let mut i = ((prefix * total as u128) >> 64) as u64;
        while i + 1 < total && boundary(i + 1, total) as u128 <= prefix {
            i += 1;
        }
        Ok(i)
    }

    /// All shards for a given total, in order.
    pub fn all(total: u64) -> Result<Vec<ShardSpec>> {
        (0..total.max(1))
            .map(|i| ShardSpec::new(i, total))
            .collect()
    }
}

impl fmt::Display for ShardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.total)
    }
}

/// `floor(i * 2^64 / total)` for `i < total`, exact in 128-bit arithmetic.
fn boundary(i: u64, total: u64) -> u64 {
    (((i as u128) << 64) / total as u128) as u64
}

/// A contiguous range of location hashes: `[start, end)`, or `[start, end]`
/// when `end_inclusive`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRange {
    pub start: LocationHash,
    pub end: LocationHash,
    pub end_inclusive: bool,
}

impl ShardRange {
    /// Check whether `hash` falls inside this range.
    pub fn contains(&self, hash: &LocationHash) -> bool {
        let before_end = if self.end_inclusive {
            hash <= &self.end
        } else {
            hash < &self.end
        };
        hash >= &self.start && before_end
    }
}

impl fmt::Display for ShardRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let close = if self.end_inclusive { ']' } else { ')' };
        write!(f, "[{}, {}{close}", self.start, self.end)
    }
}
