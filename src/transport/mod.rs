//! Transport boundary for propagating knowledge between processes.
//!
//! The core only ever talks to a [`Transport`] after a successful
//! evaluate/wait with pending modifications, and receives inbound traffic
//! as [`KnowledgeUpdate`]s applied through the context's conflict
//! resolution. Socket transports live outside this crate; the in-process
//! [`channel::ChannelHub`] is the embedded reference implementation.

/// In-process bounded-channel transport fabric.
pub mod channel;
/// Assignment-batch codec for `MultipleAssignment` payloads.
pub mod codec;

use serde::{Deserialize, Serialize};

use crate::error::{KarlResult, TransportError};
use crate::record::{KnowledgeRecord, KnowledgeValue};

pub use channel::{ChannelHub, ChannelHubConfig, ChannelTransport};
pub use codec::{encode_assignments, split_assignments};

/// Kind of an update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// One key, one value.
    Assignment,
    /// A batch of `key = value ;` pairs carried as a single string payload,
    /// re-tokenized by [`split_assignments`] on receipt.
    MultipleAssignment,
}

/// One inbound or outbound knowledge update.
///
/// For `MultipleAssignment` the `key` is empty and `value` holds the
/// encoded batch; `clock` and `quality` apply to every pair in it.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeUpdate {
    pub key: String,
    pub value: KnowledgeValue,
    pub clock: u64,
    pub quality: u32,
    pub originator: String,
    pub kind: UpdateKind,
}

impl KnowledgeUpdate {
    /// A single-key assignment update.
    #[must_use]
    pub fn assignment(key: impl Into<String>, record: &KnowledgeRecord, originator: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: record.value.clone(),
            clock: record.clock,
            quality: record.quality,
            originator: originator.into(),
            kind: UpdateKind::Assignment,
        }
    }

    /// A batched assignment update.
    #[must_use]
    pub fn multiple_assignment(
        encoded: impl Into<String>,
        clock: u64,
        quality: u32,
        originator: impl Into<String>,
    ) -> Self {
        Self {
            key: String::new(),
            value: KnowledgeValue::String(encoded.into()),
            clock,
            quality,
            originator: originator.into(),
            kind: UpdateKind::MultipleAssignment,
        }
    }

    /// JSON wire encoding used by out-of-process transports.
    pub fn to_json(&self) -> KarlResult<String> {
        serde_json::to_string(self).map_err(|e| {
            TransportError::MalformedPayload {
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Decodes the JSON wire encoding.
    pub fn from_json(json: &str) -> KarlResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            TransportError::MalformedPayload {
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// The collaborator the context hands modified knowledge to.
///
/// Implementations must not block the caller: `send` runs while the
/// context lock is held.
pub trait Transport: Send + Sync {
    /// Propagates one key's record.
    fn send(&self, key: &str, record: &KnowledgeRecord) -> KarlResult<()>;

    /// Propagates a batch encoded by [`encode_assignments`], stamped with
    /// one shared clock and quality.
    fn send_multi(&self, encoded: &str, clock: u64, quality: u32) -> KarlResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_json_round_trip() {
        let record = KnowledgeRecord::with_meta(KnowledgeValue::Integer(5), 10, 1);
        let update = KnowledgeUpdate::assignment("position", &record, "agent-1");
        let json = update.to_json().unwrap();
        let back = KnowledgeUpdate::from_json(&json).unwrap();
        assert_eq!(update, back);
    }

    #[test]
    fn malformed_json_is_a_transport_error() {
        let err = KnowledgeUpdate::from_json("{nope").unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn multiple_assignment_shape() {
        let update = KnowledgeUpdate::multiple_assignment("a = 1 ; b = 2 ;", 7, 0, "agent-1");
        assert_eq!(update.kind, UpdateKind::MultipleAssignment);
        assert!(update.key.is_empty());
        assert_eq!(update.clock, 7);
    }
}
