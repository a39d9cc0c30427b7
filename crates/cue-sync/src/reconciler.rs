//! Session state reconciler
//!
//! The reconciler is the single writer of a node's session state. All
//! inputs (local intents, remote stamps, link events, outcomes of live
//! sends) arrive as commands on one mpsc inbox and are applied in order by
//! one task, so observers see every change of the resolved value exactly
//! once and in order.
//!
//! Live sends run in their own tasks and report back through the inbox. The
//! actor never awaits the transport, so two nodes sending to each other at
//! the same moment cannot deadlock.
//!
//! ## Propagation
//!
//! Every local intent is announced live when the peer is reachable and
//! mirrored to the durable register so the peer's next cold launch sees it.
//! A remote stamp older than the held value is answered with the held
//! value: in the live reply, or by a best-effort re-announce for durable
//! deliveries.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, trace, warn};

use cue_core::{
    ChangeOrigin, IntentOrigin, IntentSink, NodeRole, Notice, PeerLinkStatus, PeerTransport,
    Resolution, ResolvedState, SessionActiveState, SessionObserver, StateStamp, TransportError,
    WireMessage, WireReply,
};

use crate::error::{ReconcilerError, ReconcilerResult};
use crate::ledger::{RemoteOutcome, SessionLedger};
use crate::link::{LinkEvent, PeerLinkMonitor};

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Role of the local node
    pub role: NodeRole,
    /// Capacity of the command inbox
    pub command_buffer: usize,
    /// Capacity of the resolution broadcast channel
    pub resolution_buffer: usize,
    /// Publish every local intent to the durable register
    ///
    /// When disabled, the durable register is written only after a live
    /// send of the still-current value fails.
    pub mirror_durable: bool,
    /// Refuse local starts while the peer is unreachable
    pub require_reachable_to_start: bool,
}

impl ReconcilerConfig {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            command_buffer: 256,
            resolution_buffer: 64,
            mirror_durable: true,
            require_reachable_to_start: false,
        }
    }
}

/// Point-in-time view of the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSnapshot {
    pub resolved: ResolvedState,
    pub state: SessionActiveState,
    pub stamp: Option<StateStamp>,
    pub link: PeerLinkStatus,
}

/// Live request whose outcome is pending
#[derive(Debug, Clone, Copy)]
enum Outbound {
    Announce(StateStamp),
    Sync,
}

enum Command {
    Propose {
        active: bool,
        origin: IntentOrigin,
        respond: oneshot::Sender<ReconcilerResult<StateStamp>>,
    },
    Toggle {
        respond: oneshot::Sender<ReconcilerResult<StateStamp>>,
    },
    Remote {
        stamp: StateStamp,
        origin: ChangeOrigin,
        respond: oneshot::Sender<Option<StateStamp>>,
    },
    SyncRequested {
        respond: oneshot::Sender<Option<StateStamp>>,
    },
    Link(LinkEvent),
    LiveOutcome {
        outbound: Outbound,
        result: Result<Vec<u8>, TransportError>,
    },
    Snapshot {
        respond: oneshot::Sender<ReconcilerSnapshot>,
    },
    RegisterObserver(Arc<dyn SessionObserver>),
}

/// Handle for talking to a running reconciler
#[derive(Clone)]
pub struct ReconcilerHandle {
    role: NodeRole,
    commands: mpsc::Sender<Command>,
    resolutions: broadcast::Sender<Resolution>,
}

impl ReconcilerHandle {
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Submit a user intent
    pub async fn propose(&self, active: bool) -> ReconcilerResult<StateStamp> {
        self.propose_with_origin(active, IntentOrigin::User).await
    }

    /// Submit a local intent with an explicit origin
    pub async fn propose_with_origin(
        &self,
        active: bool,
        origin: IntentOrigin,
    ) -> ReconcilerResult<StateStamp> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(Command::Propose {
                active,
                origin,
                respond,
            })
            .await?;
        rx.await?
    }

    /// Flip the held value
    ///
    /// Toggling from `Unknown` starts a session.
    pub async fn toggle(&self) -> ReconcilerResult<StateStamp> {
        let (respond, rx) = oneshot::channel();
        self.commands.send(Command::Toggle { respond }).await?;
        rx.await?
    }

    /// Apply a stamp received from the peer
    ///
    /// Returns the value held afterwards, which is what a live reply carries.
    pub async fn deliver_remote(
        &self,
        stamp: StateStamp,
        origin: ChangeOrigin,
    ) -> ReconcilerResult<Option<StateStamp>> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(Command::Remote {
                stamp,
                origin,
                respond,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Answer a peer's sync request with the held value
    pub async fn sync_requested(&self) -> ReconcilerResult<Option<StateStamp>> {
        let (respond, rx) = oneshot::channel();
        self.commands
            .send(Command::SyncRequested { respond })
            .await?;
        Ok(rx.await?)
    }

    /// Forward a link event
    pub async fn link_event(&self, event: LinkEvent) -> ReconcilerResult<()> {
        self.commands.send(Command::Link(event)).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> ReconcilerResult<ReconcilerSnapshot> {
        let (respond, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot { respond }).await?;
        Ok(rx.await?)
    }

    pub async fn resolved(&self) -> ReconcilerResult<ResolvedState> {
        Ok(self.snapshot().await?.resolved)
    }

    /// Register an observer called on every resolved change
    pub async fn register_observer(
        &self,
        observer: Arc<dyn SessionObserver>,
    ) -> ReconcilerResult<()> {
        self.commands
            .send(Command::RegisterObserver(observer))
            .await?;
        Ok(())
    }

    /// Subscribe to resolved changes
    pub fn subscribe(&self) -> broadcast::Receiver<Resolution> {
        self.resolutions.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[async_trait]
impl IntentSink for ReconcilerHandle {
    async fn submit_intent(&self, active: bool, origin: IntentOrigin) -> bool {
        match self.propose_with_origin(active, origin).await {
            Ok(_) => true,
            Err(ReconcilerError::Closed) => false,
            Err(e) => {
                debug!(error = %e, "Intent refused");
                true
            }
        }
    }
}

/// The reconciler task
pub struct Reconciler {
    config: ReconcilerConfig,
    ledger: SessionLedger,
    transport: Arc<dyn PeerTransport>,
    link: Arc<PeerLinkMonitor>,
    observers: Vec<Arc<dyn SessionObserver>>,
    resolutions: broadcast::Sender<Resolution>,
    notices: broadcast::Sender<Notice>,
    commands: mpsc::Receiver<Command>,
    /// Used by live send tasks to report back without keeping the inbox open
    outcomes: mpsc::WeakSender<Command>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Reconciler {
    /// Spawn the reconciler as a background task
    pub fn spawn(
        config: ReconcilerConfig,
        transport: Arc<dyn PeerTransport>,
        link: Arc<PeerLinkMonitor>,
        notices: broadcast::Sender<Notice>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> (ReconcilerHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let (resolutions, _) = broadcast::channel(config.resolution_buffer.max(1));

        let handle = ReconcilerHandle {
            role: config.role,
            commands: tx.clone(),
            resolutions: resolutions.clone(),
        };

        let task = Self {
            ledger: SessionLedger::new(config.role),
            config,
            transport,
            link,
            observers: Vec::new(),
            resolutions,
            notices,
            commands,
            outcomes: tx.downgrade(),
            shutdown_rx,
        };

        let join = tokio::spawn(task.run().in_current_span());
        (handle, join)
    }

    async fn run(mut self) {
        info!(role = %self.config.role, "Reconciler started");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Reconciler shutting down");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => {
                            debug!("All reconciler handles dropped");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Propose {
                active,
                origin,
                respond,
            } => {
                let _ = respond.send(self.handle_propose(active, origin));
            }
            Command::Toggle { respond } => {
                let active = !self.ledger.resolved().is_active();
                let _ = respond.send(self.handle_propose(active, IntentOrigin::User));
            }
            Command::Remote {
                stamp,
                origin,
                respond,
            } => {
                let _ = respond.send(self.handle_remote(stamp, origin));
            }
            Command::SyncRequested { respond } => {
                trace!("Peer requested sync");
                let _ = respond.send(self.ledger.stamp());
            }
            Command::Link(event) => self.handle_link(event),
            Command::LiveOutcome { outbound, result } => self.handle_live_outcome(outbound, result),
            Command::Snapshot { respond } => {
                let _ = respond.send(ReconcilerSnapshot {
                    resolved: self.ledger.resolved(),
                    state: self.ledger.state(),
                    stamp: self.ledger.stamp(),
                    link: self.link.status(),
                });
            }
            Command::RegisterObserver(observer) => self.observers.push(observer),
        }
    }

    fn handle_propose(&mut self, active: bool, origin: IntentOrigin) -> ReconcilerResult<StateStamp> {
        if active && self.config.require_reachable_to_start && !self.link.status().can_send_live() {
            warn!("Refusing to start: peer unreachable");
            let _ = self.notices.send(Notice::PeerUnreachable);
            return Err(ReconcilerError::PeerUnreachable);
        }

        let update = self.ledger.propose(active);
        debug!(stamp = %update.stamp, origin = ?origin, "Local intent applied");

        if update.changed() {
            self.notify(Resolution {
                previous: update.previous,
                stamp: update.stamp,
                origin: ChangeOrigin::Local(origin),
            });
        }

        if self.config.mirror_durable {
            self.publish_durable(update.stamp);
        }
        self.send_live(Outbound::Announce(update.stamp));

        Ok(update.stamp)
    }

    fn handle_remote(&mut self, stamp: StateStamp, origin: ChangeOrigin) -> Option<StateStamp> {
        let outcome = self.ledger.apply_remote(stamp);
        match outcome {
            RemoteOutcome::Adopted { previous } => {
                debug!(stamp = %stamp, origin = ?origin, "Remote value adopted");
                if outcome.changed(self.ledger.resolved()) {
                    self.notify(Resolution {
                        previous,
                        stamp,
                        origin,
                    });
                }
            }
            RemoteOutcome::Duplicate => {
                trace!(stamp = %stamp, origin = ?origin, "Remote value already held");
            }
            RemoteOutcome::Stale { current } => {
                debug!(
                    stale = %stamp,
                    current = %current,
                    origin = ?origin,
                    "Rejected stale remote value"
                );
                // Live senders get the current value in the reply
                if matches!(origin, ChangeOrigin::Durable | ChangeOrigin::Activation) {
                    self.send_live(Outbound::Announce(current));
                }
            }
        }
        self.ledger.stamp()
    }

    fn handle_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::ActivationCompleted { reachable, durable } => {
                if let Some(stamp) = durable {
                    self.handle_remote(stamp, ChangeOrigin::Activation);
                }
                if reachable {
                    self.reannounce();
                }
            }
            LinkEvent::ReachabilityChanged { reachable: true } => self.reannounce(),
            LinkEvent::ReachabilityChanged { reachable: false } => {
                debug!("Peer went out of reach");
            }
        }
    }

    fn reannounce(&mut self) {
        match self.ledger.stamp() {
            Some(stamp) => self.send_live(Outbound::Announce(stamp)),
            None => self.send_live(Outbound::Sync),
        }
    }

    fn handle_live_outcome(&mut self, outbound: Outbound, result: Result<Vec<u8>, TransportError>) {
        match result {
            Ok(bytes) => match WireReply::from_bytes(&bytes) {
                Ok(WireReply::Current(Some(stamp))) => {
                    self.handle_remote(stamp, ChangeOrigin::Reply);
                }
                Ok(WireReply::Current(None)) => {
                    trace!("Peer holds no value yet");
                }
                Ok(other) => warn!(reply = ?other, "Unexpected reply to state message"),
                Err(e) => warn!(error = %e, "Undecodable reply from peer"),
            },
            Err(e) => {
                debug!(error = %e, outbound = ?outbound, "Live send failed");
                if let Outbound::Announce(stamp) = outbound {
                    let current = self.ledger.stamp() == Some(stamp);
                    if !self.config.mirror_durable && e.is_fallback_eligible() && current {
                        self.publish_durable(stamp);
                    }
                }
            }
        }
    }

    fn notify(&mut self, resolution: Resolution) {
        info!(
            previous = %resolution.previous,
            now = %resolution.state(),
            revision = %resolution.stamp.revision,
            origin = ?resolution.origin,
            "Session state resolved"
        );
        for observer in &self.observers {
            observer.on_resolved(&resolution);
        }
        let _ = self.resolutions.send(resolution);
    }

    fn publish_durable(&self, stamp: StateStamp) {
        match stamp.to_bytes() {
            Ok(bytes) => self.transport.publish_durable(bytes),
            Err(e) => warn!(error = %e, "Failed to encode durable value"),
        }
    }

    fn send_live(&self, outbound: Outbound) {
        if !self.transport.is_reachable() {
            trace!(outbound = ?outbound, "Peer unreachable, skipping live send");
            if let Outbound::Announce(stamp) = outbound {
                if !self.config.mirror_durable {
                    self.publish_durable(stamp);
                }
            }
            return;
        }

        let message = match outbound {
            Outbound::Announce(stamp) => WireMessage::Announce(stamp),
            Outbound::Sync => WireMessage::SyncRequest,
        };
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode live message");
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let outcomes = self.outcomes.clone();
        tokio::spawn(
            async move {
                let result = transport.send_live(payload).await;
                if let Some(tx) = outcomes.upgrade() {
                    let _ = tx.send(Command::LiveOutcome { outbound, result }).await;
                }
            }
            .in_current_span(),
        );
    }
}
