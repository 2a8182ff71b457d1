//! Engine-private snapshot messages exchanged between cluster instances.
//!
//! Sender instances push one [`SeriesSnapshot`] per collection tick and one
//! [`WatchesSnapshot`] per evaluation tick to the receiver. The encoding is
//! bincode over the [`Message`] envelope and is internal to this system —
//! both ends are always the same version, so no cross-version compatibility
//! is attempted.

use serde::{Deserialize, Serialize};

use crate::types::{CompareOp, Unit};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[source] bincode::Error),

    #[error("snapshot decoding failed: {0}")]
    Decode(#[source] bincode::Error),
}

/// One `(series, value)` pair observed in a collection tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointRecord {
    pub series: String,
    pub value: i64,
}

/// A point-in-time event attached to a series during a collection tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub series: String,
    pub value: i64,
    pub keyed: bool,
    pub attrs: Vec<(String, String)>,
}

/// All `(series, value)` pairs and annotations one sender instance collected
/// in a single tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub instance: String,
    pub time: i64,
    pub points: Vec<PointRecord>,
    pub annotations: Vec<AnnotationRecord>,
}

/// One threshold condition of a watch definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDef {
    pub op: CompareOp,
    pub threshold: i64,
    #[serde(default = "one")]
    pub for_count: u32,
    #[serde(default)]
    pub on_average: bool,
}

fn one() -> u32 {
    1
}

/// Start/stop condition pair for one severity level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircumstanceDef {
    pub start: ConditionDef,
    #[serde(default)]
    pub stop: Option<ConditionDef>,
}

/// Serializable form of a watch: persisted as JSON in the watch-config
/// store and forwarded between instances inside [`WatchesSnapshot`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchDef {
    pub name: String,
    pub series: String,
    pub unit: Unit,
    #[serde(default)]
    pub red: Option<CircumstanceDef>,
    #[serde(default)]
    pub amber: Option<CircumstanceDef>,
    #[serde(default)]
    pub green: Option<CircumstanceDef>,
}

/// The watch definitions one sender instance currently collects from its
/// local watch sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchesSnapshot {
    pub instance: String,
    pub watches: Vec<WatchDef>,
}

/// Envelope distinguishing the two snapshot kinds on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Series(SeriesSnapshot),
    Watches(WatchesSnapshot),
}

impl Message {
    /// Encodes the message for transport.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Encode`] when serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(WireError::Encode)
    }

    /// Decodes a received payload.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Decode`] for truncated or malformed payloads;
    /// callers drop such messages without propagating a fault to the sender.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(payload).map_err(WireError::Decode)
    }
}
