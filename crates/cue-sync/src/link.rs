//! Peer link monitoring
//!
//! The [`PeerLinkMonitor`] relays transport connectivity callbacks. It owns
//! the node's [`PeerLinkStatus`] and turns raw callbacks into [`LinkEvent`]s,
//! raising a reachability event only on actual transitions. It holds no
//! session state.

use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use cue_core::{PeerLinkStatus, StateStamp};

/// Connectivity events consumed by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport finished activating
    ///
    /// `durable` is the last value the peer published, if any; it is the
    /// node's initial remote value after a cold launch.
    ActivationCompleted {
        reachable: bool,
        durable: Option<StateStamp>,
    },

    /// Live reachability of the peer changed
    ReachabilityChanged { reachable: bool },
}

/// Tracks local reachability/activation state of the remote peer
pub struct PeerLinkMonitor {
    status: watch::Sender<PeerLinkStatus>,
    events: broadcast::Sender<LinkEvent>,
}

impl PeerLinkMonitor {
    /// Create a monitor with the given event channel capacity
    pub fn new(event_capacity: usize) -> Self {
        let (status, _) = watch::channel(PeerLinkStatus::default());
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self { status, events }
    }

    /// Current link status
    pub fn status(&self) -> PeerLinkStatus {
        *self.status.borrow()
    }

    /// Watch the link status
    pub fn watch(&self) -> watch::Receiver<PeerLinkStatus> {
        self.status.subscribe()
    }

    /// Subscribe to link events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Record completion of the activation handshake
    ///
    /// An undecodable durable value is dropped with a warning; the node then
    /// waits for its first live contact instead.
    pub fn activation_completed(&self, reachable: bool, durable: Option<&[u8]>) -> LinkEvent {
        self.status.send_replace(PeerLinkStatus {
            activated: true,
            reachable,
        });

        let durable = durable.and_then(|bytes| match StateStamp::from_bytes(bytes) {
            Ok(stamp) => Some(stamp),
            Err(e) => {
                warn!(error = %e, "Discarding undecodable durable value");
                None
            }
        });

        debug!(reachable, durable = ?durable, "Link activation completed");
        let event = LinkEvent::ActivationCompleted { reachable, durable };
        let _ = self.events.send(event);
        event
    }

    /// Record a reachability callback
    ///
    /// Returns the event to forward, or `None` if nothing changed.
    pub fn reachability_changed(&self, reachable: bool) -> Option<LinkEvent> {
        let changed = self.status.send_if_modified(|status| {
            if status.reachable == reachable {
                false
            } else {
                status.reachable = reachable;
                true
            }
        });
        if !changed {
            return None;
        }

        debug!(reachable, "Peer reachability changed");
        let event = LinkEvent::ReachabilityChanged { reachable };
        let _ = self.events.send(event);
        Some(event)
    }
}

impl Default for PeerLinkMonitor {
    fn default() -> Self {
        Self::new(64)
    }
}
