//! Mock transport implementation for testing
//!
//! Provides an in-memory pairing between a phone and a wrist endpoint that
//! behaves like the platform channel: live requests fail fast when the peer
//! is out of reach, durable values are held in a last-value register and
//! delivered on the next activation or reachability change.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cue_core::{MockLink, NodeRole, PeerTransport};
//!
//! let link = MockLink::new();
//! let (phone, wrist) = link.pair();
//! link.activate(NodeRole::Phone);
//! link.activate(NodeRole::Wrist);
//!
//! // Out of range: live fails, durable waits for the peer
//! link.set_reachable(false);
//! assert!(phone.send_live(b"hi".to_vec()).await.is_err());
//! phone.publish_durable(b"latest".to_vec());
//!
//! // Back in range: the wrist receives the durable value
//! link.set_reachable(true);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::TransportError;
use crate::identity::NodeRole;
use crate::transport::{LiveReply, PeerTransport, TransportEvent};

/// Configuration for a mock link
#[derive(Debug, Clone)]
pub struct MockLinkConfig {
    /// How long a live request waits for the peer's reply
    pub live_timeout: Duration,
    /// Whether the peers start within range of each other
    pub initially_reachable: bool,
}

impl Default for MockLinkConfig {
    fn default() -> Self {
        Self {
            live_timeout: Duration::from_millis(500),
            initially_reachable: true,
        }
    }
}

/// Counters for assertions in tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockLinkStats {
    pub live_attempts: usize,
    pub live_delivered: usize,
    pub durable_published: usize,
    pub durable_delivered: usize,
}

#[derive(Debug, Default)]
struct Side {
    activated: bool,
    generation: u64,
    inbox: Option<mpsc::UnboundedSender<TransportEvent>>,
    /// Latest durable value received from the peer
    durable_received: Option<Vec<u8>>,
    /// Whether `durable_received` still has to be surfaced
    durable_pending: bool,
    stats: MockLinkStats,
}

impl Side {
    fn push(&self, event: TransportEvent) {
        if let Some(inbox) = &self.inbox {
            let _ = inbox.send(event);
        }
    }
}

#[derive(Debug, Default)]
struct LinkState {
    in_range: bool,
    phone: Side,
    wrist: Side,
}

impl LinkState {
    fn side(&self, role: NodeRole) -> &Side {
        match role {
            NodeRole::Phone => &self.phone,
            NodeRole::Wrist => &self.wrist,
        }
    }

    fn side_mut(&mut self, role: NodeRole) -> &mut Side {
        match role {
            NodeRole::Phone => &mut self.phone,
            NodeRole::Wrist => &mut self.wrist,
        }
    }

    /// Live reachability: in range and both processes activated
    fn reachable(&self) -> bool {
        self.in_range && self.phone.activated && self.wrist.activated
    }

    fn flush_durable(&mut self, role: NodeRole) {
        let side = self.side_mut(role);
        if side.activated && side.durable_pending {
            if let Some(payload) = side.durable_received.clone() {
                side.durable_pending = false;
                side.stats.durable_delivered += 1;
                side.push(TransportEvent::Durable { payload });
            }
        }
    }

    fn notify_reachability(&self, reachable: bool, skip: Option<NodeRole>) {
        for role in [NodeRole::Phone, NodeRole::Wrist] {
            if Some(role) == skip {
                continue;
            }
            let side = self.side(role);
            if side.activated {
                side.push(TransportEvent::ReachabilityChanged { reachable });
            }
        }
    }
}

fn lock(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An in-memory pairing between a phone and a wrist endpoint
///
/// The link owns the platform-side state (range, activation, durable
/// registers). Endpoints are handed out as [`MockTransport`]s.
#[derive(Clone)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
    config: MockLinkConfig,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// Create a link with default settings (peers in range)
    pub fn new() -> Self {
        Self::with_config(MockLinkConfig::default())
    }

    pub fn with_config(config: MockLinkConfig) -> Self {
        let state = LinkState {
            in_range: config.initially_reachable,
            ..LinkState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            config,
        }
    }

    /// Create both endpoints
    pub fn pair(&self) -> (Arc<MockTransport>, Arc<MockTransport>) {
        (self.endpoint(NodeRole::Phone), self.endpoint(NodeRole::Wrist))
    }

    /// Create (or re-create) the endpoint for one role
    ///
    /// A re-created endpoint models a cold relaunch of that process: the
    /// previous endpoint is closed, the new one starts deactivated, and the
    /// durable register it already received is kept by the platform.
    pub fn endpoint(&self, role: NodeRole) -> Arc<MockTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = {
            let mut state = lock(&self.state);
            let was_reachable = state.reachable();

            let side = state.side_mut(role);
            side.activated = false;
            side.generation += 1;
            side.inbox = Some(tx);
            if side.durable_received.is_some() {
                side.durable_pending = true;
            }
            let generation = side.generation;

            if was_reachable {
                state.notify_reachability(false, Some(role));
            }
            generation
        };

        Arc::new(MockTransport {
            role,
            generation,
            state: Arc::clone(&self.state),
            inbox: tokio::sync::Mutex::new(rx),
            live_timeout: self.config.live_timeout,
        })
    }

    /// Cold relaunch of one side; see [`MockLink::endpoint`]
    pub fn restart(&self, role: NodeRole) -> Arc<MockTransport> {
        self.endpoint(role)
    }

    /// Finish the activation handshake for one side
    ///
    /// The activated side receives [`TransportEvent::Activated`] with the last
    /// durable value it holds. The other side learns about reachability if it
    /// changed as a result.
    pub fn activate(&self, role: NodeRole) {
        let mut state = lock(&self.state);
        let was_reachable = state.reachable();

        let side = state.side_mut(role);
        if side.activated {
            return;
        }
        side.activated = true;
        side.durable_pending = false;
        let durable = side.durable_received.clone();

        let reachable = state.reachable();
        trace!(role = %role, reachable, has_durable = durable.is_some(), "Mock activation");
        state
            .side(role)
            .push(TransportEvent::Activated { reachable, durable });

        if reachable != was_reachable {
            state.flush_durable(role.peer());
            state.notify_reachability(reachable, Some(role));
        }
    }

    /// Move the peers in or out of range of each other
    pub fn set_reachable(&self, in_range: bool) {
        let mut state = lock(&self.state);
        let was_reachable = state.reachable();
        state.in_range = in_range;
        let reachable = state.reachable();

        if reachable == was_reachable {
            return;
        }
        trace!(reachable, "Mock reachability change");
        if reachable {
            state.flush_durable(NodeRole::Phone);
            state.flush_durable(NodeRole::Wrist);
        }
        state.notify_reachability(reachable, None);
    }

    /// Whether both sides can currently exchange live messages
    pub fn is_reachable(&self) -> bool {
        lock(&self.state).reachable()
    }

    /// Latest durable value `role` has received from its peer
    pub fn durable_received(&self, role: NodeRole) -> Option<Vec<u8>> {
        lock(&self.state).side(role).durable_received.clone()
    }

    /// Counters for the endpoint of `role`
    pub fn stats(&self, role: NodeRole) -> MockLinkStats {
        lock(&self.state).side(role).stats
    }
}

/// One endpoint of a [`MockLink`]
pub struct MockTransport {
    role: NodeRole,
    generation: u64,
    state: Arc<Mutex<LinkState>>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
    live_timeout: Duration,
}

impl MockTransport {
    /// Role this endpoint belongs to
    pub fn role(&self) -> NodeRole {
        self.role
    }

    fn is_current(&self, state: &LinkState) -> bool {
        let side = state.side(self.role);
        side.generation == self.generation && side.activated
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn send_live(&self, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.state);
            if !self.is_current(&state) {
                return Err(TransportError::NotActivated);
            }
            state.side_mut(self.role).stats.live_attempts += 1;
            if !state.reachable() {
                return Err(TransportError::Unreachable);
            }

            let peer = state.side(self.role.peer());
            let delivered = peer.inbox.as_ref().is_some_and(|inbox| {
                inbox
                    .send(TransportEvent::Live {
                        payload,
                        reply: LiveReply::new(tx),
                    })
                    .is_ok()
            });
            if !delivered {
                return Err(TransportError::Unreachable);
            }
            state.side_mut(self.role).stats.live_delivered += 1;
        }

        match tokio::time::timeout(self.live_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Unreachable),
            Err(_) => Err(TransportError::Timeout(
                self.live_timeout.as_millis() as u64,
            )),
        }
    }

    fn publish_durable(&self, payload: Vec<u8>) {
        let mut state = lock(&self.state);
        if state.side(self.role).generation != self.generation {
            return;
        }
        state.side_mut(self.role).stats.durable_published += 1;

        let peer_role = self.role.peer();
        let deliver_now = state.reachable();
        let peer = state.side_mut(peer_role);
        peer.durable_received = Some(payload);
        peer.durable_pending = true;
        if deliver_now {
            state.flush_durable(peer_role);
        }
    }

    fn is_reachable(&self) -> bool {
        let state = lock(&self.state);
        self.is_current(&state) && state.reachable()
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut inbox = self.inbox.lock().await;
        inbox
            .recv()
            .await
            .ok_or_else(|| TransportError::ReceiveFailed("link closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    async fn expect_event(transport: &MockTransport) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(1), transport.next_event())
            .await
            .expect("event timed out")
            .expect("link closed")
    }

    fn activated_pair(link: &MockLink) -> (Arc<MockTransport>, Arc<MockTransport>) {
        let (phone, wrist) = link.pair();
        link.activate(NodeRole::Phone);
        link.activate(NodeRole::Wrist);
        (phone, wrist)
    }

    #[tokio::test]
    async fn test_live_round_trip() {
        let link = MockLink::new();
        let (phone, wrist) = activated_pair(&link);

        // Activation events
        assert!(matches!(
            expect_event(&phone).await,
            TransportEvent::Activated { reachable: false, .. }
        ));
        assert!(matches!(
            expect_event(&phone).await,
            TransportEvent::ReachabilityChanged { reachable: true }
        ));
        assert!(matches!(
            expect_event(&wrist).await,
            TransportEvent::Activated { reachable: true, .. }
        ));

        let responder = tokio::spawn({
            let wrist = Arc::clone(&wrist);
            async move {
                match wrist.next_event().await.unwrap() {
                    TransportEvent::Live { payload, reply } => {
                        assert_eq!(payload, b"ping".to_vec());
                        reply.send(b"pong".to_vec());
                    }
                    other => panic!("unexpected event: {:?}", other),
                }
            }
        });

        let reply = assert_ok!(phone.send_live(b"ping".to_vec()).await);
        assert_eq!(reply, b"pong".to_vec());
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_live_fails_fast_when_out_of_range() {
        let link = MockLink::new();
        let (phone, _wrist) = activated_pair(&link);
        link.set_reachable(false);

        let result = phone.send_live(b"ping".to_vec()).await;
        assert_eq!(result, Err(TransportError::Unreachable));
        assert_eq!(link.stats(NodeRole::Phone).live_delivered, 0);
    }

    #[tokio::test]
    async fn test_live_times_out_without_reply() {
        let link = MockLink::with_config(MockLinkConfig {
            live_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        let (phone, _wrist) = activated_pair(&link);

        let result = phone.send_live(b"ping".to_vec()).await;
        assert_eq!(result, Err(TransportError::Timeout(20)));
    }

    #[tokio::test]
    async fn test_durable_is_last_value_wins() {
        let link = MockLink::new();
        let (phone, wrist) = activated_pair(&link);
        link.set_reachable(false);
        while wrist.inbox.lock().await.try_recv().is_ok() {}

        phone.publish_durable(b"first".to_vec());
        phone.publish_durable(b"second".to_vec());
        assert_eq!(link.stats(NodeRole::Wrist).durable_delivered, 0);
        assert_eq!(link.durable_received(NodeRole::Wrist), Some(b"second".to_vec()));
        assert_eq!(link.durable_received(NodeRole::Phone), None);

        link.set_reachable(true);
        match expect_event(&wrist).await {
            TransportEvent::Durable { payload } => assert_eq!(payload, b"second".to_vec()),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            expect_event(&wrist).await,
            TransportEvent::ReachabilityChanged { reachable: true }
        ));
        assert_eq!(link.stats(NodeRole::Wrist).durable_delivered, 1);
    }

    #[tokio::test]
    async fn test_activation_surfaces_stored_durable_value() {
        let link = MockLink::new();
        let phone = link.endpoint(NodeRole::Phone);
        link.activate(NodeRole::Phone);

        // Wrist process is not running yet
        phone.publish_durable(b"active".to_vec());

        let wrist = link.endpoint(NodeRole::Wrist);
        link.activate(NodeRole::Wrist);
        match expect_event(&wrist).await {
            TransportEvent::Activated { reachable, durable } => {
                assert!(reachable);
                assert_eq!(durable, Some(b"active".to_vec()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restart_closes_previous_endpoint() {
        let link = MockLink::new();
        let (_phone, wrist) = activated_pair(&link);
        while wrist.inbox.lock().await.try_recv().is_ok() {}

        let relaunched = link.restart(NodeRole::Wrist);
        assert_err!(wrist.next_event().await);
        assert_eq!(
            wrist.send_live(Vec::new()).await,
            Err(TransportError::NotActivated)
        );
        assert!(!relaunched.is_reachable());

        link.activate(NodeRole::Wrist);
        assert!(relaunched.is_reachable());
    }
}
