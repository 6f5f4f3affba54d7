//! Configuration for the broadcast node.

use std::time::Duration;

/// Configuration options for a broadcast node.
///
/// The pull and push intervals are independent tuning parameters: the
/// push cycle runs faster so a node with fresh values announces them
/// promptly, while the pull cycle is the slower safety net that also
/// repairs cursors after lost pushes.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interval between pull cycles.
    ///
    /// Each tick requests the missing suffix from every neighbor.
    ///
    /// Default: 250ms
    pub pull_interval: Duration,

    /// Interval between push cycles.
    ///
    /// Each tick sends neighbors the suffix they are known to be missing,
    /// fire-and-forget.
    ///
    /// Default: 125ms
    pub push_interval: Duration,

    /// Timeout for a single synchronous pull request.
    ///
    /// A neighbor that fails to answer within this bound is skipped for
    /// the current tick; the next tick is the implicit retry.
    ///
    /// Default: 10s
    pub sync_timeout: Duration,

    /// Maximum number of in-flight pull requests per tick.
    ///
    /// Bounds the fan-out so a large neighbor set cannot spawn an
    /// unbounded number of outstanding requests.
    ///
    /// Default: 8
    pub max_concurrent_pulls: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pull_interval: Duration::from_millis(250),
            push_interval: Duration::from_millis(125),
            sync_timeout: Duration::from_secs(10),
            max_concurrent_pulls: 8,
        }
    }
}

impl NodeConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration optimized for LAN environments.
    ///
    /// Shorter cycles and a tight timeout for fast convergence.
    pub fn lan() -> Self {
        Self {
            pull_interval: Duration::from_millis(100),
            push_interval: Duration::from_millis(50),
            sync_timeout: Duration::from_secs(1),
            max_concurrent_pulls: 16,
        }
    }

    /// Configuration optimized for WAN environments.
    ///
    /// Slower cycles and a generous timeout for high-latency links.
    pub fn wan() -> Self {
        Self {
            pull_interval: Duration::from_millis(500),
            push_interval: Duration::from_millis(250),
            sync_timeout: Duration::from_secs(30),
            max_concurrent_pulls: 4,
        }
    }

    /// Set the pull interval (builder pattern).
    pub const fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = interval;
        self
    }

    /// Set the push interval (builder pattern).
    pub const fn with_push_interval(mut self, interval: Duration) -> Self {
        self.push_interval = interval;
        self
    }

    /// Set the sync request timeout (builder pattern).
    pub const fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the maximum in-flight pulls per tick (builder pattern).
    pub const fn with_max_concurrent_pulls(mut self, max: usize) -> Self {
        self.max_concurrent_pulls = max;
        self
    }
}
