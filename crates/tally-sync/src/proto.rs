//! Wire types for the reconciliation protocol.
//!
//! Every exchange is one request and one response. Trie comparison ships a
//! single [`TrieSummary`] per round trip, never a whole trie, so payloads
//! stay small no matter how much history a replica holds.

use serde::{Deserialize, Serialize};
use tally_hlc::Timestamp;
use tally_merkle::{BucketKey, TrieSummary};
use tally_store::Message;

/// A request sent to a peer's [`SyncServer`](crate::SyncServer).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncRequest {
    /// Exchange latest timestamps; the peer folds ours into its clock.
    Clock { timestamp: Timestamp },

    /// Ask for the peer's trie node at `prefix`.
    Summary { prefix: BucketKey },

    /// Page through the peer's messages stamped at or after `since`.
    MessagesSince {
        since: u64,
        cursor: Option<Timestamp>,
        limit: usize,
    },

    /// Hand the peer messages it may be missing.
    Push { messages: Vec<Message> },
}

impl SyncRequest {
    /// Short name for logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncRequest::Clock { .. } => "clock",
            SyncRequest::Summary { .. } => "summary",
            SyncRequest::MessagesSince { .. } => "messages_since",
            SyncRequest::Push { .. } => "push",
        }
    }
}

/// Why a peer refused a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A timestamp was too far ahead of the peer's wall clock, or its
    /// counter overflowed.
    ClockDrift,
    /// The peer shares our node id.
    DuplicateNode,
    /// The request could not be decoded or made no sense.
    InvalidRequest,
    /// The peer could not persist the result.
    Storage,
}

/// A peer's answer to a [`SyncRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncResponse {
    /// The peer's latest timestamp, after folding in ours.
    Clock { timestamp: Timestamp },

    Summary { summary: TrieSummary },

    /// One page of messages; request again with `next_cursor` for more.
    Messages {
        messages: Vec<Message>,
        next_cursor: Option<Timestamp>,
    },

    /// How many pushed messages were new to the peer.
    Pushed { applied: usize },

    Rejected {
        reason: RejectReason,
        message: String,
    },
}

impl SyncResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncResponse::Clock { .. } => "clock",
            SyncResponse::Summary { .. } => "summary",
            SyncResponse::Messages { .. } => "messages",
            SyncResponse::Pushed { .. } => "pushed",
            SyncResponse::Rejected { .. } => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_hlc::NodeId;
    use tally_store::CellAddress;

    #[test]
    fn test_request_wire_form() {
        let ts = Timestamp::new(1_000, 2, NodeId::new("A1").unwrap());
        let json = serde_json::to_value(SyncRequest::Clock { timestamp: ts }).unwrap();
        assert_eq!(json["type"], "clock");
        assert_eq!(json["timestamp"], "1970-01-01T00:00:01.000Z-0002-00000000000000A1");

        let json = serde_json::to_value(SyncRequest::Summary {
            prefix: BucketKey::parse("012").unwrap(),
        })
        .unwrap();
        assert_eq!(json["prefix"], "012");
    }

    #[test]
    fn test_messages_round_trip() {
        let ts = Timestamp::new(1_000, 0, NodeId::new("B2").unwrap());
        let response = SyncResponse::Messages {
            messages: vec![Message::new(
                CellAddress::new("budget1", "cat7", "amount"),
                300i64,
                ts.clone(),
            )],
            next_cursor: Some(ts),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(serde_json::from_str::<SyncResponse>(&json).unwrap(), response);
    }

    #[test]
    fn test_rejects_malformed_summary_prefix() {
        let json = r#"{"type":"summary","prefix":"0193"}"#;
        assert!(serde_json::from_str::<SyncRequest>(json).is_err());
    }
}
