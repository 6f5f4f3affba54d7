//! Protocol message types.
//!
//! Every message body is a tagged variant, decoded exactly once at the
//! runtime boundary; handlers only ever see typed messages. The serde
//! representation matches the Maelstrom wire format: a `"type"` tag in
//! snake_case plus the variant's fields inlined into the body object.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::Value;

/// Protocol messages exchanged with clients and peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Runtime handshake: assigns this node its identity.
    Init {
        /// Identity of this node.
        node_id: String,
        /// Identities of every node in the cluster.
        node_ids: Vec<String>,
    },

    /// Handshake acknowledgment.
    InitOk,

    /// Submit a value for storage and dissemination.
    Broadcast {
        /// The value being broadcast.
        message: Value,
    },

    /// Broadcast acknowledgment; always sent, idempotent.
    BroadcastOk,

    /// Request the full snapshot of observed values.
    Read,

    /// Snapshot reply.
    ReadOk {
        /// Every value this node has observed so far.
        messages: Vec<Value>,
    },

    /// Install this node's neighbor set.
    Topology {
        /// Map from node id to its neighbor list.
        topology: HashMap<String, Vec<String>>,
    },

    /// Topology acknowledgment.
    TopologyOk,

    /// Pull request: "send me everything past `delta`".
    Sync {
        /// The requester's cursor for the receiving node.
        delta: u64,
    },

    /// The missing suffix plus the sender's current log length.
    ///
    /// Sent both as the reply to a [`Message::Sync`] pull and
    /// unsolicited by the push cycle; receivers treat both identically.
    SyncOk {
        /// The sender's log length at computation time.
        delta: u64,
        /// Log entries the receiver was missing, oldest first.
        messages_delta: Vec<Value>,
    },

    /// Protocol-level error reply.
    Error {
        /// Maelstrom error code.
        code: u64,
        /// Human-readable description.
        text: String,
    },
}

impl Message {
    /// The wire tag of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Init { .. } => "init",
            Message::InitOk => "init_ok",
            Message::Broadcast { .. } => "broadcast",
            Message::BroadcastOk => "broadcast_ok",
            Message::Read => "read",
            Message::ReadOk { .. } => "read_ok",
            Message::Topology { .. } => "topology",
            Message::TopologyOk => "topology_ok",
            Message::Sync { .. } => "sync",
            Message::SyncOk { .. } => "sync_ok",
            Message::Error { .. } => "error",
        }
    }
}
