//! Proximity transport abstraction
//!
//! The [`PeerTransport`] trait models the platform pairing channel between
//! the two nodes. It offers two delivery modes:
//!
//! - **Live**: a request/reply round trip that only works while both peers
//!   are reachable. Fails fast otherwise; never queues, never retries.
//! - **Durable**: a last-value-wins register replicated by the platform.
//!   Publishing always succeeds locally; the peer observes the latest value
//!   immediately when reachable, or the next time it activates or becomes
//!   reachable.
//!
//! Inbound callbacks are surfaced through [`PeerTransport::next_event`] and
//! may be produced on any task. Consumers marshal them into their own
//! serialization domain.
//!
//! ## Implementations
//!
//! - [`MockTransport`](crate::MockTransport): in-memory pairing for tests and simulation

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// Inbound transport callback
#[derive(Debug)]
pub enum TransportEvent {
    /// Activation handshake finished
    ///
    /// Carries the last durable value received from the peer, if any,
    /// including one that was already delivered before this activation.
    Activated {
        reachable: bool,
        durable: Option<Vec<u8>>,
    },

    /// Live reachability of the peer changed
    ReachabilityChanged { reachable: bool },

    /// A live request from the peer awaiting a reply
    Live { payload: Vec<u8>, reply: LiveReply },

    /// The peer published a new durable value
    Durable { payload: Vec<u8> },
}

/// Reply slot for an inbound live request
///
/// Dropping it without replying makes the sender's round trip fail.
#[derive(Debug)]
pub struct LiveReply(oneshot::Sender<Vec<u8>>);

impl LiveReply {
    pub fn new(sender: oneshot::Sender<Vec<u8>>) -> Self {
        Self(sender)
    }

    /// Send the reply payload back to the requester
    ///
    /// Returns false if the requester has already given up.
    pub fn send(self, payload: Vec<u8>) -> bool {
        self.0.send(payload).is_ok()
    }
}

/// Transport between the phone and wrist nodes
///
/// # Example
///
/// ```rust,ignore
/// use cue_core::{PeerTransport, TransportError};
///
/// async fn announce<T: PeerTransport + ?Sized>(transport: &T, payload: Vec<u8>) {
///     match transport.send_live(payload.clone()).await {
///         Ok(_reply) => {}
///         Err(TransportError::Unreachable) => transport.publish_durable(payload),
///         Err(_) => {}
///     }
/// }
/// ```
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send a live request and wait for the peer's reply
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unreachable`] immediately if the peer is not
    /// reachable, or [`TransportError::Timeout`] if no reply arrives in time.
    async fn send_live(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Replace the durable register value
    ///
    /// Always succeeds locally. Only the most recent value reaches the peer.
    fn publish_durable(&self, payload: Vec<u8>);

    /// Whether the peer is currently reachable over the live channel
    fn is_reachable(&self) -> bool;

    /// Wait for the next inbound callback
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReceiveFailed`] once the transport is closed.
    async fn next_event(&self) -> Result<TransportEvent, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_reply_delivers_payload() {
        let (tx, rx) = oneshot::channel();
        let reply = LiveReply::new(tx);
        assert!(reply.send(b"ack".to_vec()));
        assert_eq!(rx.await.unwrap(), b"ack".to_vec());
    }

    #[tokio::test]
    async fn test_live_reply_to_departed_requester() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        assert!(!LiveReply::new(tx).send(Vec::new()));
    }

    #[test]
    fn test_transport_trait_is_object_safe() {
        fn assert_dyn(_: Option<&dyn PeerTransport>) {}
        assert_dyn(None);
    }
}
