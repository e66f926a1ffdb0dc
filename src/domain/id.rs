//! Short hash-based IDs for chapters and published snapshots
//!
//! ID Format:
//! - Chapter IDs: `c-{7-char-hash}` (e.g., `c-7f2b4c1`)
//! - Published snapshot IDs: `p-{7-char-hash}` (e.g., `p-9d3e5f2`)
//!
//! The hash is derived from a seed (author email, chapter id) plus the
//! creation timestamp, so the same author creating two chapters in a row
//! still gets two distinct IDs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("Invalid chapter ID format: expected 'c-{{7-char-hash}}', got '{0}'")]
    InvalidChapterId(String),

    #[error("Invalid published ID format: expected 'p-{{7-char-hash}}', got '{0}'")]
    InvalidPublishedId(String),
}

/// Generates a 7-character hash from a seed and timestamp
fn generate_hash(seed: &str, timestamp: DateTime<Utc>) -> String {
    let input = format!("{}{}", seed, timestamp.timestamp_nanos_opt().unwrap_or(0));
    let hash = blake3::hash(input.as_bytes());
    let hex = hash.to_hex();
    hex[..7].to_string()
}

/// Parses the hash part of `{prefix}-{7 hex}`
fn parse_hash(s: &str, prefix: &str) -> Option<String> {
    let hash = s.trim().strip_prefix(prefix)?.strip_prefix('-')?;
    if hash.len() != 7 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}

/// Chapter ID in the format `c-{7-char-hash}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChapterId {
    hash: String,
}

impl ChapterId {
    /// Creates a new chapter ID for an owner at a point in time
    pub fn new(owner: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            hash: generate_hash(owner, timestamp),
        }
    }

    /// Returns the hash portion of the ID
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c-{}", self.hash)
    }
}

impl FromStr for ChapterId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hash(s, "c")
            .map(|hash| Self { hash })
            .ok_or_else(|| IdError::InvalidChapterId(s.trim().to_string()))
    }
}

impl TryFrom<String> for ChapterId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChapterId> for String {
    fn from(id: ChapterId) -> Self {
        id.to_string()
    }
}

/// Published snapshot ID in the format `p-{7-char-hash}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublishedId {
    hash: String,
}

impl PublishedId {
    /// Creates a new snapshot ID for a chapter at a point in time
    pub fn new(chapter_id: &ChapterId, timestamp: DateTime<Utc>) -> Self {
        Self {
            hash: generate_hash(&chapter_id.to_string(), timestamp),
        }
    }

    /// Returns the hash portion of the ID
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for PublishedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p-{}", self.hash)
    }
}

impl FromStr for PublishedId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hash(s, "p")
            .map(|hash| Self { hash })
            .ok_or_else(|| IdError::InvalidPublishedId(s.trim().to_string()))
    }
}

impl TryFrom<String> for PublishedId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublishedId> for String {
    fn from(id: PublishedId) -> Self {
        id.to_string()
    }
}
