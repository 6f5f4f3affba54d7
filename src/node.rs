//! Core broadcast node: state, handlers, and the anti-entropy cycles.
//!
//! A node owns the value store and the neighbor cursor table behind a
//! single coarse mutex. Inbound handlers run concurrently with two
//! independently-ticking background activities:
//!
//! - the **pull cycle** requests each neighbor's missing suffix with a
//!   bounded synchronous RPC, and
//! - the **push cycle** sends each neighbor the suffix it is known to
//!   be missing, fire-and-forget.
//!
//! The lock is held only to read cursors and merge deltas, never across
//! network I/O, so an unreachable neighbor cannot stall replication to
//! the others.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_timer::Delay;
use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::{
    config::NodeConfig,
    error::{Error, Result},
    message::Message,
    store::ValueStore,
    sync::{apply_delta, compute_delta, SyncDelta},
    topology::NeighborTable,
    transport::Transport,
};

/// A single node in the broadcast cluster.
///
/// Cheap to clone; all clones share the same state.
pub struct Node<T> {
    inner: Arc<NodeInner<T>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct NodeInner<T> {
    /// This node's identity.
    id: String,

    /// Tuning parameters.
    config: NodeConfig,

    /// Message delivery layer.
    transport: T,

    /// The only shared mutable state: value store + neighbor cursors,
    /// under one lock.
    state: Mutex<State>,

    /// Shutdown flag.
    shutdown: AtomicBool,

    /// Shutdown notification channel - closing the sender wakes every
    /// background task.
    shutdown_tx: async_channel::Sender<()>,
    shutdown_rx: async_channel::Receiver<()>,
}

#[derive(Default)]
struct State {
    store: ValueStore,
    neighbors: NeighborTable,
}

impl<T: Transport> Node<T> {
    /// Create a new node with the given identity and transport.
    pub fn new(id: impl Into<String>, config: NodeConfig, transport: T) -> Self {
        let (shutdown_tx, shutdown_rx) = async_channel::bounded(1);
        Self {
            inner: Arc::new(NodeInner {
                id: id.into(),
                config,
                transport,
                state: Mutex::new(State::default()),
                shutdown: AtomicBool::new(false),
                shutdown_tx,
                shutdown_rx,
            }),
        }
    }

    /// This node's identity.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Snapshot of every value this node has observed so far.
    pub fn values(&self) -> Vec<u64> {
        self.inner.state.lock().store.snapshot()
    }

    /// Cursor for `peer`, if it is a known neighbor.
    pub fn neighbor_cursor(&self, peer: &str) -> Option<u64> {
        self.inner.state.lock().neighbors.cursor(peer)
    }

    /// Handle one inbound message from `from`.
    ///
    /// Returns the reply to send back, if the message warrants one. A
    /// returned error means the request was rejected without mutating
    /// any state; the runtime surfaces it to the sender as an error
    /// body.
    pub fn handle_message(&self, from: &str, message: Message) -> Result<Option<Message>> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }

        match message {
            Message::Broadcast { message } => {
                let appended = self.inner.state.lock().store.append_if_new(message);
                if appended {
                    tracing::debug!(value = message, "stored broadcast value");
                }
                // Duplicate or not, the ack is the same: broadcast is
                // idempotent from the client's perspective.
                Ok(Some(Message::BroadcastOk))
            }

            Message::Read => {
                let messages = self.inner.state.lock().store.snapshot();
                Ok(Some(Message::ReadOk { messages }))
            }

            Message::Topology { mut topology } => {
                let neighbor_ids = topology.remove(self.id()).unwrap_or_default();
                tracing::debug!(neighbors = ?neighbor_ids, "installing topology");
                self.inner.state.lock().neighbors.install(neighbor_ids);
                Ok(Some(Message::TopologyOk))
            }

            Message::Sync { delta } => {
                let state = self.inner.state.lock();
                let computed = compute_delta(delta, &state.store)?;
                Ok(Some(Message::SyncOk {
                    delta: computed.cursor,
                    messages_delta: computed.values,
                }))
            }

            Message::SyncOk {
                delta,
                messages_delta,
            } => {
                self.apply_sync(from, delta, messages_delta);
                Ok(None)
            }

            // Peers may echo acks; nothing to do.
            Message::BroadcastOk => Ok(None),

            other => {
                tracing::debug!(from, kind = other.kind(), "ignoring message");
                Ok(None)
            }
        }
    }

    /// Merge a received delta: every value through `append_if_new`,
    /// then advance the sender's cursor to its reported position.
    fn apply_sync(&self, peer: &str, cursor: u64, values: Vec<u64>) {
        let mut guard = self.inner.state.lock();
        let State { store, neighbors } = &mut *guard;
        let merged = apply_delta(store, neighbors, peer, SyncDelta { cursor, values });
        if merged > 0 {
            tracing::debug!(peer, merged, cursor, "merged sync delta");
        }
    }

    /// Run both anti-entropy cycles until shutdown.
    pub async fn run(&self) {
        futures::future::join(self.run_pull_cycle(), self.run_push_cycle()).await;
    }

    /// Run the pull cycle background task.
    ///
    /// This should be spawned as a background task.
    pub async fn run_pull_cycle(&self) {
        use futures::future::FutureExt;

        let mut interval = Delay::new(self.inner.config.pull_interval);

        loop {
            let shutdown_recv = self.inner.shutdown_rx.recv().fuse();
            futures::pin_mut!(shutdown_recv);

            futures::select! {
                _ = (&mut interval).fuse() => {
                    interval.reset(self.inner.config.pull_interval);
                }
                _ = shutdown_recv => {
                    break;
                }
            }

            if self.inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            self.pull_tick().await;
        }
    }

    /// Run the push cycle background task.
    ///
    /// This should be spawned as a background task.
    pub async fn run_push_cycle(&self) {
        use futures::future::FutureExt;

        let mut interval = Delay::new(self.inner.config.push_interval);

        loop {
            let shutdown_recv = self.inner.shutdown_rx.recv().fuse();
            futures::pin_mut!(shutdown_recv);

            futures::select! {
                _ = (&mut interval).fuse() => {
                    interval.reset(self.inner.config.push_interval);
                }
                _ = shutdown_recv => {
                    break;
                }
            }

            if self.inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            self.push_tick().await;
        }
    }

    /// One pull tick: ask every neighbor for our missing suffix.
    ///
    /// Cursors are read under the lock, the lock is released, and the
    /// RPCs run with bounded concurrency. Failures and timeouts skip
    /// the neighbor; the next tick is the implicit retry.
    async fn pull_tick(&self) {
        use futures::stream::StreamExt;

        let mut targets = self.inner.state.lock().neighbors.cursors();
        if targets.is_empty() {
            // No topology installed yet.
            return;
        }
        targets.shuffle(&mut rand::thread_rng());

        let limit = self.inner.config.max_concurrent_pulls.max(1);
        futures::stream::iter(targets)
            .for_each_concurrent(limit, |(peer, cursor)| async move {
                self.pull_one(&peer, cursor).await;
            })
            .await;
    }

    async fn pull_one(&self, peer: &str, cursor: u64) {
        let request = Message::Sync { delta: cursor };
        let reply = self
            .inner
            .transport
            .rpc(peer, request, self.inner.config.sync_timeout)
            .await;

        match reply {
            Ok(Message::SyncOk {
                delta,
                messages_delta,
            }) => {
                self.apply_sync(peer, delta, messages_delta);
            }
            Ok(Message::Error { code, text }) => {
                // The peer rejected our cursor; leave it and let the
                // peer's own pushes repair the gap.
                tracing::debug!(peer, code, text = %text, "sync request rejected");
            }
            Ok(other) => {
                tracing::warn!(peer, kind = other.kind(), "unexpected sync reply");
            }
            Err(err) => {
                tracing::debug!(peer, %err, "pull skipped until next tick");
            }
        }
    }

    /// One push tick: send every lagging neighbor its missing suffix.
    ///
    /// Deltas are computed in one pass under the lock, then sent with
    /// the lock released. Caught-up neighbors and neighbors whose
    /// cursor is inconsistent are skipped.
    async fn push_tick(&self) {
        let batches: Vec<(String, SyncDelta)> = {
            let state = self.inner.state.lock();
            state
                .neighbors
                .cursors()
                .into_iter()
                .filter_map(|(peer, cursor)| match compute_delta(cursor, &state.store) {
                    Ok(delta) if delta.is_empty() => None,
                    Ok(delta) => Some((peer, delta)),
                    Err(err) => {
                        tracing::debug!(peer, %err, "push skipped");
                        None
                    }
                })
                .collect()
        };

        for (peer, delta) in batches {
            let message = Message::SyncOk {
                delta: delta.cursor,
                messages_delta: delta.values,
            };
            if let Err(err) = self.inner.transport.send_to(&peer, message).await {
                tracing::debug!(peer, %err, "push send failed");
            }
        }
    }

    /// Shut the node down, waking both background cycles.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.shutdown_tx.close();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelTransport, NoopTransport};
    use std::collections::HashMap;

    fn topology_for(node: &str, neighbors: &[&str]) -> Message {
        let mut topology = HashMap::new();
        topology.insert(
            node.to_string(),
            neighbors.iter().map(|s| s.to_string()).collect(),
        );
        Message::Topology { topology }
    }

    fn node_with_values(values: &[u64]) -> Node<NoopTransport> {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);
        for &v in values {
            node.handle_message("c1", Message::Broadcast { message: v })
                .unwrap();
        }
        node
    }

    #[test]
    fn test_broadcast_then_read() {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);

        let reply = node
            .handle_message("c1", Message::Broadcast { message: 42 })
            .unwrap();
        assert_eq!(reply, Some(Message::BroadcastOk));

        let reply = node.handle_message("c1", Message::Read).unwrap();
        assert_eq!(reply, Some(Message::ReadOk { messages: vec![42] }));
    }

    #[test]
    fn test_duplicate_broadcast_still_acked() {
        let node = node_with_values(&[42]);

        let reply = node
            .handle_message("c1", Message::Broadcast { message: 42 })
            .unwrap();
        assert_eq!(reply, Some(Message::BroadcastOk));
        assert_eq!(node.values(), vec![42]);
    }

    #[test]
    fn test_sync_responder_returns_missing_suffix() {
        let node = node_with_values(&[1, 2, 3]);

        let reply = node
            .handle_message("n2", Message::Sync { delta: 0 })
            .unwrap();
        assert_eq!(
            reply,
            Some(Message::SyncOk {
                delta: 3,
                messages_delta: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn test_sync_responder_caught_up_peer_gets_empty_delta() {
        let node = node_with_values(&[1, 2, 3]);

        let reply = node
            .handle_message("n2", Message::Sync { delta: 3 })
            .unwrap();
        assert_eq!(
            reply,
            Some(Message::SyncOk {
                delta: 3,
                messages_delta: vec![],
            })
        );
    }

    #[test]
    fn test_sync_responder_rejects_inconsistent_cursor() {
        let node = node_with_values(&[1, 2, 3]);
        node.handle_message("c1", topology_for("n1", &["n2"]))
            .unwrap();

        let err = node
            .handle_message("n2", Message::Sync { delta: 5 })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InconsistentCursor {
                remote: 5,
                local: 3
            }
        ));

        // State unchanged, node still serving.
        assert_eq!(node.values(), vec![1, 2, 3]);
        assert_eq!(node.neighbor_cursor("n2"), Some(0));
        let reply = node.handle_message("c1", Message::Read).unwrap();
        assert_eq!(
            reply,
            Some(Message::ReadOk {
                messages: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn test_unsolicited_sync_ok_merges_and_advances_cursor() {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);
        node.handle_message("c1", topology_for("n1", &["n2"]))
            .unwrap();

        let reply = node
            .handle_message(
                "n2",
                Message::SyncOk {
                    delta: 2,
                    messages_delta: vec![7, 8],
                },
            )
            .unwrap();

        assert_eq!(reply, None);
        assert_eq!(node.values(), vec![7, 8]);
        assert_eq!(node.neighbor_cursor("n2"), Some(2));
    }

    #[test]
    fn test_sync_ok_from_unknown_peer_merges_values_only() {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);

        node.handle_message(
            "n9",
            Message::SyncOk {
                delta: 1,
                messages_delta: vec![5],
            },
        )
        .unwrap();

        assert_eq!(node.values(), vec![5]);
        assert_eq!(node.neighbor_cursor("n9"), None);
    }

    #[test]
    fn test_topology_installs_own_neighbors_only() {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);

        let mut topology = HashMap::new();
        topology.insert("n1".to_string(), vec!["n2".to_string()]);
        topology.insert("n2".to_string(), vec!["n3".to_string()]);
        let reply = node
            .handle_message("c1", Message::Topology { topology })
            .unwrap();

        assert_eq!(reply, Some(Message::TopologyOk));
        assert_eq!(node.neighbor_cursor("n2"), Some(0));
        assert_eq!(node.neighbor_cursor("n3"), None);
    }

    #[test]
    fn test_stray_replies_are_ignored() {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);

        assert_eq!(
            node.handle_message("n2", Message::BroadcastOk).unwrap(),
            None
        );
        assert_eq!(
            node.handle_message("n2", Message::ReadOk { messages: vec![1] })
                .unwrap(),
            None
        );
        assert!(node.values().is_empty());
    }

    #[test]
    fn test_handle_after_shutdown_fails() {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);
        node.shutdown();

        let err = node
            .handle_message("c1", Message::Broadcast { message: 1 })
            .unwrap_err();
        assert!(matches!(err, Error::Shutdown));
    }

    #[tokio::test]
    async fn test_push_tick_sends_missing_suffix() {
        let (transport, rx) = ChannelTransport::bounded(16);
        let node = Node::new("n1", NodeConfig::default(), transport);
        node.handle_message("c1", topology_for("n1", &["n2"]))
            .unwrap();
        for v in [1, 2, 3] {
            node.handle_message("c1", Message::Broadcast { message: v })
                .unwrap();
        }

        node.push_tick().await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.target, "n2");
        assert_eq!(
            frame.message,
            Message::SyncOk {
                delta: 3,
                messages_delta: vec![1, 2, 3],
            }
        );
        assert!(frame.reply.is_none());

        // The cursor only advances on the neighbor's own sync_ok, so
        // the next tick re-sends the same suffix.
        node.push_tick().await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(
            frame.message,
            Message::SyncOk {
                delta: 3,
                messages_delta: vec![1, 2, 3],
            }
        );
    }

    #[tokio::test]
    async fn test_push_tick_skips_caught_up_neighbor() {
        let (transport, rx) = ChannelTransport::bounded(16);
        let node = Node::new("n1", NodeConfig::default(), transport);
        node.handle_message("c1", topology_for("n1", &["n2"]))
            .unwrap();
        node.handle_message("c1", Message::Broadcast { message: 9 })
            .unwrap();
        // n2 reports it already holds one entry.
        node.handle_message(
            "n2",
            Message::SyncOk {
                delta: 1,
                messages_delta: vec![9],
            },
        )
        .unwrap();

        node.push_tick().await;
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_pull_tick_merges_reply() {
        let (transport, rx) = ChannelTransport::bounded(16);
        let node = Node::new(
            "n1",
            NodeConfig::default().with_sync_timeout(std::time::Duration::from_secs(1)),
            transport,
        );
        node.handle_message("c1", topology_for("n1", &["n2"]))
            .unwrap();

        let responder = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.target, "n2");
            assert_eq!(frame.message, Message::Sync { delta: 0 });
            frame
                .reply
                .unwrap()
                .send(Message::SyncOk {
                    delta: 3,
                    messages_delta: vec![1, 2, 3],
                })
                .unwrap();
        });

        node.pull_tick().await;
        responder.await.unwrap();

        assert_eq!(node.values(), vec![1, 2, 3]);
        assert_eq!(node.neighbor_cursor("n2"), Some(3));
    }

    #[tokio::test]
    async fn test_pull_tick_survives_silent_neighbor() {
        let (transport, rx) = ChannelTransport::bounded(16);
        let node = Node::new(
            "n1",
            NodeConfig::default().with_sync_timeout(std::time::Duration::from_millis(20)),
            transport,
        );
        node.handle_message("c1", topology_for("n1", &["n2"]))
            .unwrap();

        // Swallow the request, never answer.
        let silent = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            drop(frame.reply);
        });

        node.pull_tick().await;
        silent.await.unwrap();

        assert!(node.values().is_empty());
        assert_eq!(node.neighbor_cursor("n2"), Some(0));
    }

    #[tokio::test]
    async fn test_pull_tick_without_topology_is_noop() {
        let node = Node::new("n1", NodeConfig::default(), NoopTransport);
        node.pull_tick().await;
        node.push_tick().await;
        assert!(node.values().is_empty());
    }
}
