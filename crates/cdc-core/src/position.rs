//! Binlog position: a totally ordered (log_file, log_position) pair.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The conventional first usable position in a fresh binlog file, past the
/// 4-byte magic header.
pub const FIRST_USABLE_POSITION: u64 = 4;

/// A point in the source's binlog. Ordered lexicographically by file name
/// first, then numerically by position within that file.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub log_file: String,
    pub log_position: u64,
}

impl Position {
    pub fn new(log_file: impl Into<String>, log_position: u64) -> Self {
        Self {
            log_file: log_file.into(),
            log_position,
        }
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.log_file
            .cmp(&other.log_file)
            .then_with(|| self.log_position.cmp(&other.log_position))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.log_file, self.log_position)
    }
}
