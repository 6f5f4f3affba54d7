//! Maelstrom-style stdio runtime.
//!
//! Speaks the Maelstrom node protocol: one JSON envelope per line on
//! stdin, one per line on stdout (logs go to stderr). The runtime
//! supplies everything the engine expects from the layer below it:
//! dispatch of inbound bodies to the node's handler, reply correlation
//! via `in_reply_to`, fire-and-forget sends, and timeout-bounded
//! synchronous RPCs (for the pull cycle) matched to replies through a
//! pending-request table.
//!
//! Lifecycle: [`serve`] waits for the `init` message, builds the
//! [`Node`] with a [`MaelstromTransport`], answers `init_ok`, spawns
//! the anti-entropy cycles, then dispatches envelopes until stdin
//! closes.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use bytes::Bytes;
use futures::channel::oneshot;
use futures::future::FutureExt;
use futures_timer::Delay;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::node::Node;
use crate::transport::Transport;

/// One Maelstrom wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender identity.
    pub src: String,
    /// Recipient identity.
    pub dest: String,
    /// The message body.
    pub body: Body,
}

/// Envelope body: correlation ids plus the tagged message, flattened
/// into one JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Unique id of this message, when the sender expects a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    /// The `msg_id` this body answers, when it is a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    /// The protocol message.
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Encode as one newline-terminated JSON line.
    pub fn to_line(&self) -> Result<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// Transport that sends envelopes through the runtime's writer channel
/// and resolves RPCs from inbound replies.
#[derive(Clone)]
pub struct MaelstromTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    node_id: String,
    out_tx: async_channel::Sender<Envelope>,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
}

impl MaelstromTransport {
    /// Create a transport writing envelopes to `out_tx` as `node_id`.
    pub fn new(node_id: String, out_tx: async_channel::Sender<Envelope>) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                node_id,
                out_tx,
                next_msg_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn next_msg_id(&self) -> u64 {
        self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Route an inbound reply to the RPC waiting on `in_reply_to`.
    ///
    /// Returns the message back when nothing is waiting (unknown id, or
    /// the pull already timed out) so the caller can dispatch it as an
    /// unsolicited message instead - merges are idempotent, so a late
    /// `sync_ok` is still worth applying.
    pub fn complete_rpc(&self, in_reply_to: u64, message: Message) -> Option<Message> {
        match self.inner.pending.lock().remove(&in_reply_to) {
            Some(tx) => match tx.send(message) {
                Ok(()) => None,
                Err(message) => Some(message),
            },
            None => Some(message),
        }
    }

    /// Send a reply correlated to `in_reply_to`.
    pub async fn reply(
        &self,
        dest: String,
        in_reply_to: Option<u64>,
        message: Message,
    ) -> Result<()> {
        let envelope = Envelope {
            src: self.inner.node_id.clone(),
            dest,
            body: Body {
                msg_id: Some(self.next_msg_id()),
                in_reply_to,
                message,
            },
        };
        self.inner.out_tx.send(envelope).await.map_err(Into::into)
    }

    /// Number of RPCs currently awaiting a reply.
    pub fn pending_rpcs(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl Transport for MaelstromTransport {
    async fn send_to(&self, target: &str, message: Message) -> Result<()> {
        let envelope = Envelope {
            src: self.inner.node_id.clone(),
            dest: target.to_string(),
            body: Body {
                msg_id: Some(self.next_msg_id()),
                in_reply_to: None,
                message,
            },
        };
        self.inner
            .out_tx
            .send(envelope)
            .await
            .map_err(|e| Error::Transport {
                peer: target.to_string(),
                reason: e.to_string(),
            })
    }

    async fn rpc(&self, target: &str, message: Message, timeout: Duration) -> Result<Message> {
        let msg_id = self.next_msg_id();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.pending.lock().insert(msg_id, reply_tx);

        let envelope = Envelope {
            src: self.inner.node_id.clone(),
            dest: target.to_string(),
            body: Body {
                msg_id: Some(msg_id),
                in_reply_to: None,
                message,
            },
        };
        if let Err(err) = self.inner.out_tx.send(envelope).await {
            self.inner.pending.lock().remove(&msg_id);
            return Err(Error::Transport {
                peer: target.to_string(),
                reason: err.to_string(),
            });
        }

        let mut reply_rx = reply_rx.fuse();
        let mut deadline = Delay::new(timeout).fuse();
        futures::select! {
            reply = reply_rx => reply.map_err(|_| Error::Transport {
                peer: target.to_string(),
                reason: "runtime stopped".to_string(),
            }),
            _ = deadline => {
                self.inner.pending.lock().remove(&msg_id);
                Err(Error::Timeout {
                    peer: target.to_string(),
                })
            }
        }
    }
}

/// Maelstrom error code for a handler rejection.
fn error_code(err: &Error) -> u64 {
    match err {
        Error::Timeout { .. } => 0,
        Error::MalformedMessage(_) => 12,
        Error::InconsistentCursor { .. } => 22,
        Error::Shutdown => 11,
        _ => 13,
    }
}

/// Run a node over stdin/stdout until stdin closes.
///
/// Fatal only on IO failure of the runtime boundary itself; every
/// protocol-level error is answered or logged and the loop continues.
pub async fn serve(config: NodeConfig) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let (out_tx, out_rx) = async_channel::bounded::<Envelope>(1024);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Ok(envelope) = out_rx.recv().await {
            let line = match envelope.to_line() {
                Ok(line) => line,
                Err(err) => {
                    tracing::error!(%err, "failed to encode envelope");
                    continue;
                }
            };
            if let Err(err) = stdout.write_all(&line).await {
                tracing::error!(%err, "stdout write failed");
                break;
            }
            if let Err(err) = stdout.flush().await {
                tracing::error!(%err, "stdout flush failed");
                break;
            }
        }
    });

    // Wait for init before anything else; only it carries our identity.
    let (node, transport) = loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| Error::Channel("stdin closed before init".to_string()))?;
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, "skipping malformed envelope");
                continue;
            }
        };
        match envelope.body.message {
            Message::Init { node_id, node_ids } => {
                tracing::info!(node_id = %node_id, cluster_size = node_ids.len(), "node initialized");
                let transport = MaelstromTransport::new(node_id.clone(), out_tx.clone());
                let node = Node::new(node_id, config.clone(), transport.clone());
                transport
                    .reply(envelope.src, envelope.body.msg_id, Message::InitOk)
                    .await?;
                break (node, transport);
            }
            other => {
                tracing::warn!(kind = other.kind(), "dropping message received before init");
            }
        }
    };

    let cycles = tokio::spawn({
        let node = node.clone();
        async move { node.run().await }
    });

    while let Some(line) = lines.next_line().await? {
        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(%err, "skipping malformed envelope");
                continue;
            }
        };
        let Envelope { src, body, .. } = envelope;
        let Body {
            msg_id,
            in_reply_to,
            message,
        } = body;

        // Replies first: resolve the pull waiting on this msg_id. A
        // reply nobody is waiting for falls through to normal dispatch.
        let message = match in_reply_to {
            Some(id) => match transport.complete_rpc(id, message) {
                Some(message) => message,
                None => continue,
            },
            None => message,
        };

        match node.handle_message(&src, message) {
            Ok(Some(reply)) => {
                transport.reply(src, msg_id, reply).await?;
            }
            Ok(None) => {}
            Err(err) if err.is_recoverable() => {
                tracing::warn!(src = %src, %err, "rejected request");
                if msg_id.is_some() {
                    transport
                        .reply(
                            src,
                            msg_id,
                            Message::Error {
                                code: error_code(&err),
                                text: err.to_string(),
                            },
                        )
                        .await?;
                }
            }
            Err(err) => {
                tracing::error!(src = %src, %err, "dropping request");
            }
        }
    }

    tracing::info!("stdin closed, shutting down");
    node.shutdown();
    out_tx.close();
    let _ = cycles.await;
    let _ = writer.await;
    Ok(())
}
