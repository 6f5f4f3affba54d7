//! Transport abstraction for message delivery.
//!
//! The engine needs exactly two primitives from the layer below it: a
//! fire-and-forget unicast send (push cycle, unsolicited `sync_ok`) and
//! a synchronous request with a caller-supplied timeout (pull cycle).
//! Nothing in the engine depends on delivery ordering or guaranteed
//! delivery; a lost frame is repaired by the next tick.
//!
//! # Available Transports
//!
//! - [`ChannelTransport`]: channel-based transport for testing
//! - [`NoopTransport`]: discards everything
//! - [`MaelstromTransport`](crate::runtime::MaelstromTransport): stdio
//!   JSON envelopes for running under a Maelstrom-style harness

use std::future::Future;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::FutureExt;
use futures_timer::Delay;

use crate::error::{Error, Result};
use crate::message::Message;

/// Transport trait for delivering protocol messages to specific peers.
pub trait Transport: Send + Sync + 'static {
    /// Send a message to `target`, fire-and-forget.
    ///
    /// An `Ok` return means the message was handed to the layer below,
    /// not that it was delivered.
    fn send_to(
        &self,
        target: &str,
        message: Message,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Send a request to `target` and wait for its reply.
    ///
    /// Resolves to [`Error::Timeout`] if no reply arrives within
    /// `timeout`; the caller treats that as "skip this peer until the
    /// next tick".
    fn rpc(
        &self,
        target: &str,
        message: Message,
        timeout: Duration,
    ) -> impl Future<Output = Result<Message>> + Send;
}

/// One outbound frame captured by a [`ChannelTransport`].
#[derive(Debug)]
pub struct Frame {
    /// Target peer.
    pub target: String,
    /// The message being sent.
    pub message: Message,
    /// Present for RPC frames; complete it to answer the request.
    pub reply: Option<oneshot::Sender<Message>>,
}

/// A channel-based transport that outputs [`Frame`]s.
///
/// Useful for tests that want to observe or script a node's outbound
/// traffic: fire-and-forget sends arrive without a reply slot, RPCs
/// carry a oneshot sender the consumer can complete.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: async_channel::Sender<Frame>,
}

impl ChannelTransport {
    /// Create a channel transport with a new bounded channel.
    ///
    /// Returns the transport and the receiver for outbound frames.
    pub fn bounded(capacity: usize) -> (Self, async_channel::Receiver<Frame>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    async fn send_to(&self, target: &str, message: Message) -> Result<()> {
        self.tx
            .send(Frame {
                target: target.to_string(),
                message,
                reply: None,
            })
            .await
            .map_err(|e| Error::Transport {
                peer: target.to_string(),
                reason: e.to_string(),
            })
    }

    async fn rpc(&self, target: &str, message: Message, timeout: Duration) -> Result<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Frame {
                target: target.to_string(),
                message,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|e| Error::Transport {
                peer: target.to_string(),
                reason: e.to_string(),
            })?;

        let mut reply_rx = reply_rx.fuse();
        let mut deadline = Delay::new(timeout).fuse();
        futures::select! {
            reply = reply_rx => reply.map_err(|_| Error::Transport {
                peer: target.to_string(),
                reason: "reply channel dropped".to_string(),
            }),
            _ = deadline => Err(Error::Timeout {
                peer: target.to_string(),
            }),
        }
    }
}

/// A no-op transport that discards all messages.
///
/// Sends succeed, RPCs time out immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl Transport for NoopTransport {
    async fn send_to(&self, _target: &str, _message: Message) -> Result<()> {
        Ok(())
    }

    async fn rpc(&self, target: &str, _message: Message, _timeout: Duration) -> Result<Message> {
        Err(Error::Timeout {
            peer: target.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_send() {
        let (transport, rx) = ChannelTransport::bounded(16);

        transport
            .send_to("n2", Message::Broadcast { message: 7 })
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.target, "n2");
        assert_eq!(frame.message, Message::Broadcast { message: 7 });
        assert!(frame.reply.is_none());
    }

    #[tokio::test]
    async fn test_channel_transport_rpc_round_trip() {
        let (transport, rx) = ChannelTransport::bounded(16);

        let responder = tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.message, Message::Sync { delta: 0 });
            frame
                .reply
                .unwrap()
                .send(Message::SyncOk {
                    delta: 2,
                    messages_delta: vec![1, 2],
                })
                .unwrap();
        });

        let reply = transport
            .rpc("n2", Message::Sync { delta: 0 }, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            reply,
            Message::SyncOk {
                delta: 2,
                messages_delta: vec![1, 2],
            }
        );
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_transport_rpc_timeout() {
        let (transport, _rx) = ChannelTransport::bounded(16);

        let err = transport
            .rpc("n2", Message::Sync { delta: 0 }, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_channel_transport_send_after_close() {
        let (transport, rx) = ChannelTransport::bounded(16);
        drop(rx);

        let err = transport
            .send_to("n2", Message::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn test_noop_transport() {
        let transport = NoopTransport;
        transport.send_to("n2", Message::Read).await.unwrap();

        let err = transport
            .rpc("n2", Message::Read, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
