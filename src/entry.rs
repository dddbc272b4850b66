//! Log entries and source identifiers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque log source identifier. It is the position of the source in the merge input list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(pub usize);

impl SourceId {
    /// Returns the source position in the merge input list.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Single log entry.
///
/// Serialized as `{"timestamp": "<ISO-8601>", "payload": ...}`. The payload is opaque to the merge,
/// only the timestamp is ever compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<P = serde_json::Value> {
    pub timestamp: DateTime<Utc>,
    pub payload: P,
}

impl<P> Entry<P> {
    pub fn new(timestamp: DateTime<Utc>, payload: P) -> Self {
        Entry { timestamp, payload }
    }
}
