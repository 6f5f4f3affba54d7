//! # deltacast
//!
//! A single node of a leaderless broadcast cluster: clients submit
//! values, each node records every distinct value in an append-only
//! log, and a cursor-driven anti-entropy engine reconciles the log
//! with each neighbor through periodic delta exchange. No reliable
//! delivery is assumed between nodes; lost frames are repaired by the
//! next tick.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Runtime (stdio JSON)                     │
//! │   envelope decode · reply correlation · RPC pending table    │
//! └──────────────────────────────┬──────────────────────────────┘
//! │ handle_message()
//! ┌──────────────────────────────▼──────────────────────────────┐
//! │                            Node                              │
//! │   broadcast / read / topology / sync / sync_ok handlers      │
//! │   pull cycle (bounded RPCs)  ·  push cycle (fire-and-forget) │
//! ├──────────────────────┬──────────────────────────────────────┤
//! │      ValueStore      │            NeighborTable             │
//! │  (append-only log +  │    (per-neighbor sync cursors)       │
//! │     de-dup set)      │                                      │
//! └──────────────────────┴──────────────────────────────────────┘
//!          one coarse lock around both, never held across I/O
//! ```
//!
//! ## How reconciliation works
//!
//! Each neighbor entry carries a cursor: the log version up to which
//! the two sides are believed to be in sync. Both directions share one
//! delta rule - compare the remote cursor `r` with the local length
//! `L`, ship `log[r..L]` plus `L` as the new cursor, reject `r > L` as
//! inconsistent. The **pull** cycle asks each neighbor for this delta
//! and merges the reply; the **push** cycle computes it locally and
//! sends it unsolicited. Merging goes through the de-dup set, so
//! overlapping deltas from different neighbors are idempotent and
//! commutative: every log converges to the same set of values, in
//! whatever order they arrived.
//!
//! ## Example
//!
//! ```ignore
//! use deltacast::{Message, Node, NodeConfig, NoopTransport};
//!
//! let node = Node::new("n1", NodeConfig::default(), NoopTransport);
//!
//! // Client traffic goes through the handler...
//! node.handle_message("c1", Message::Broadcast { message: 42 })?;
//! assert_eq!(node.values(), vec![42]);
//!
//! // ...while the anti-entropy cycles run in the background.
//! tokio::spawn({
//!     let node = node.clone();
//!     async move { node.run().await }
//! });
//! ```

#![deny(missing_docs)]

mod config;
mod error;
mod message;
mod node;
mod store;
mod sync;
mod topology;
mod transport;

pub mod runtime;
pub mod testing;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use message::Message;
pub use node::Node;
pub use store::{Value, ValueStore};
pub use sync::{apply_delta, compute_delta, SyncDelta};
pub use topology::NeighborTable;
pub use transport::{ChannelTransport, Frame, NoopTransport, Transport};
