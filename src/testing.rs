//! In-memory cluster harness for tests.
//!
//! Wires several [`Node`]s together with a transport that routes
//! messages directly to the destination node's handler, with optional
//! per-link partitions. No real I/O, no wall-clock dependence beyond
//! the nodes' own tick intervals.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::node::Node;
use crate::transport::Transport;

/// Shared routing table for an in-memory cluster.
#[derive(Clone, Default)]
pub struct ClusterRouter {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    nodes: RwLock<HashMap<String, Node<ClusterTransport>>>,
    /// Directed links currently dropping traffic.
    cut: RwLock<HashSet<(String, String)>>,
}

impl ClusterRouter {
    fn register(&self, id: String, node: Node<ClusterTransport>) {
        self.inner.nodes.write().insert(id, node);
    }

    fn node(&self, id: &str) -> Option<Node<ClusterTransport>> {
        self.inner.nodes.read().get(id).cloned()
    }

    fn is_cut(&self, from: &str, to: &str) -> bool {
        self.inner
            .cut
            .read()
            .contains(&(from.to_string(), to.to_string()))
    }

    /// Drop all traffic between `a` and `b`, both directions.
    pub fn partition(&self, a: &str, b: &str) {
        let mut cut = self.inner.cut.write();
        cut.insert((a.to_string(), b.to_string()));
        cut.insert((b.to_string(), a.to_string()));
    }

    /// Restore the link between `a` and `b`.
    pub fn heal(&self, a: &str, b: &str) {
        let mut cut = self.inner.cut.write();
        cut.remove(&(a.to_string(), b.to_string()));
        cut.remove(&(b.to_string(), a.to_string()));
    }
}

/// Transport that delivers messages by invoking the destination node's
/// handler inline.
///
/// Fire-and-forget sends across a cut link vanish silently; RPCs across
/// a cut link fail immediately with [`Error::Timeout`] so tests don't
/// wait out real timeouts.
#[derive(Clone)]
pub struct ClusterTransport {
    from: String,
    router: ClusterRouter,
}

impl Transport for ClusterTransport {
    async fn send_to(&self, target: &str, message: Message) -> Result<()> {
        if self.router.is_cut(&self.from, target) {
            return Ok(());
        }
        let Some(node) = self.router.node(target) else {
            return Err(Error::Transport {
                peer: target.to_string(),
                reason: "unknown node".to_string(),
            });
        };
        // Fire-and-forget: handler errors and replies are discarded,
        // like a datagram nobody answers.
        let _ = node.handle_message(&self.from, message);
        Ok(())
    }

    async fn rpc(&self, target: &str, message: Message, _timeout: Duration) -> Result<Message> {
        if self.router.is_cut(&self.from, target) {
            return Err(Error::Timeout {
                peer: target.to_string(),
            });
        }
        let Some(node) = self.router.node(target) else {
            return Err(Error::Transport {
                peer: target.to_string(),
                reason: "unknown node".to_string(),
            });
        };
        match node.handle_message(&self.from, message) {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(Error::Transport {
                peer: target.to_string(),
                reason: "no reply".to_string(),
            }),
            Err(err) => Err(err),
        }
    }
}

/// A cluster of in-memory nodes named `n1`, `n2`, ...
pub struct TestCluster {
    router: ClusterRouter,
    ids: Vec<String>,
}

impl TestCluster {
    /// Create `size` nodes sharing one router. No topology installed.
    pub fn new(size: usize, config: NodeConfig) -> Self {
        let router = ClusterRouter::default();
        let ids: Vec<String> = (1..=size).map(|i| format!("n{}", i)).collect();
        for id in &ids {
            let transport = ClusterTransport {
                from: id.clone(),
                router: router.clone(),
            };
            router.register(id.clone(), Node::new(id.clone(), config.clone(), transport));
        }
        Self { router, ids }
    }

    /// The node ids, in order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The shared router, for partitioning links.
    pub fn router(&self) -> &ClusterRouter {
        &self.router
    }

    /// Get a handle to a node by id.
    pub fn node(&self, id: &str) -> Node<ClusterTransport> {
        self.router.node(id).expect("node registered at creation")
    }

    /// Deliver a topology message to every node.
    pub fn install(&self, topology: HashMap<String, Vec<String>>) {
        for id in &self.ids {
            self.node(id)
                .handle_message(
                    "c0",
                    Message::Topology {
                        topology: topology.clone(),
                    },
                )
                .expect("topology install");
        }
    }

    /// Install a ring topology: each node's neighbors are its
    /// predecessor and successor.
    pub fn install_ring(&self) {
        let n = self.ids.len();
        let mut topology = HashMap::new();
        for (i, id) in self.ids.iter().enumerate() {
            let prev = self.ids[(i + n - 1) % n].clone();
            let next = self.ids[(i + 1) % n].clone();
            let mut neighbors = vec![prev, next];
            neighbors.dedup();
            topology.insert(id.clone(), neighbors);
        }
        self.install(topology);
    }

    /// Install a line topology: `n1 - n2 - ... - nN`.
    pub fn install_line(&self) {
        let n = self.ids.len();
        let mut topology = HashMap::new();
        for (i, id) in self.ids.iter().enumerate() {
            let mut neighbors = Vec::new();
            if i > 0 {
                neighbors.push(self.ids[i - 1].clone());
            }
            if i + 1 < n {
                neighbors.push(self.ids[i + 1].clone());
            }
            topology.insert(id.clone(), neighbors);
        }
        self.install(topology);
    }

    /// Submit a broadcast to one node, as a client would.
    pub fn broadcast(&self, id: &str, value: u64) {
        self.node(id)
            .handle_message("c0", Message::Broadcast { message: value })
            .expect("broadcast accepted");
    }

    /// Spawn every node's anti-entropy cycles.
    pub fn spawn_cycles(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.ids
            .iter()
            .map(|id| {
                let node = self.node(id);
                tokio::spawn(async move { node.run().await })
            })
            .collect()
    }

    /// Shut every node down.
    pub fn shutdown(&self) {
        for id in &self.ids {
            self.node(id).shutdown();
        }
    }

    /// Whether every node has observed every value in `values`.
    pub fn converged_on(&self, values: &[u64]) -> bool {
        self.ids.iter().all(|id| {
            let seen = self.node(id).values();
            values.iter().all(|v| seen.contains(v))
        })
    }

    /// Poll until the cluster converges on `values` or `deadline`
    /// elapses. Returns whether convergence was reached.
    pub async fn await_convergence(&self, values: &[u64], deadline: Duration) -> bool {
        let started = std::time::Instant::now();
        loop {
            if self.converged_on(values) {
                return true;
            }
            if started.elapsed() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
