//! Broadcast node binary for a Maelstrom-style harness.
//!
//! Reads envelopes from stdin, writes replies to stdout. Logs go to
//! stderr so they never mix with the protocol stream.

use deltacast::{runtime, NodeConfig, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    runtime::serve(NodeConfig::default()).await
}
