//! Transport event pump
//!
//! Transport callbacks arrive on whatever task the platform uses. The pump
//! is the only consumer of [`PeerTransport::next_event`] and marshals every
//! callback into the node's serialization domains: link events go through
//! the [`PeerLinkMonitor`] to the reconciler, state messages to the
//! reconciler, and relayed sessions to the upload pipeline.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use cue_core::{
    ChangeOrigin, NodeRole, Notice, PeerTransport, RecordedSession, StateStamp, TransportEvent,
    WireMessage, WireReply,
};
use cue_recording::{SubmitOutcome, UploadPipeline};
use cue_sync::{PeerLinkMonitor, ReconcilerError, ReconcilerHandle};

/// Routes transport callbacks into the node
pub struct EventPump {
    role: NodeRole,
    transport: Arc<dyn PeerTransport>,
    monitor: Arc<PeerLinkMonitor>,
    reconciler: ReconcilerHandle,
    uploads: UploadPipeline,
    notices: broadcast::Sender<Notice>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl EventPump {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        monitor: Arc<PeerLinkMonitor>,
        reconciler: ReconcilerHandle,
        uploads: UploadPipeline,
        notices: broadcast::Sender<Notice>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            role: reconciler.role(),
            transport,
            monitor,
            reconciler,
            uploads,
            notices,
            shutdown_rx,
        }
    }

    /// Run until shutdown, or until the transport or reconciler closes
    pub async fn run(mut self) {
        info!("Event pump started");

        loop {
            let event = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Event pump shutting down");
                    break;
                }
                event = self.transport.next_event() => event,
            };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Transport closed, stopping event pump");
                    break;
                }
            };

            if let Err(ReconcilerError::Closed) = self.dispatch(event).await {
                debug!("Reconciler closed, stopping event pump");
                break;
            }
        }
    }

    async fn dispatch(&self, event: TransportEvent) -> Result<(), ReconcilerError> {
        match event {
            TransportEvent::Activated { reachable, durable } => {
                let event = self
                    .monitor
                    .activation_completed(reachable, durable.as_deref());
                self.reconciler.link_event(event).await?;
            }
            TransportEvent::ReachabilityChanged { reachable } => {
                if let Some(event) = self.monitor.reachability_changed(reachable) {
                    self.reconciler.link_event(event).await?;
                }
            }
            TransportEvent::Live { payload, reply } => {
                let answer = self.handle_live(&payload).await?;
                match answer.to_bytes() {
                    Ok(bytes) => {
                        if !reply.send(bytes) {
                            debug!("Peer gave up before the reply was sent");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode live reply"),
                }
            }
            TransportEvent::Durable { payload } => match StateStamp::from_bytes(&payload) {
                Ok(stamp) => {
                    self.reconciler
                        .deliver_remote(stamp, ChangeOrigin::Durable)
                        .await?;
                }
                Err(e) => warn!(error = %e, "Discarding undecodable durable value"),
            },
        }
        Ok(())
    }

    async fn handle_live(&self, payload: &[u8]) -> Result<WireReply, ReconcilerError> {
        let message = match WireMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Undecodable live message");
                return Ok(WireReply::Rejected(e.to_string()));
            }
        };

        let reply = match message {
            WireMessage::Announce(stamp) => {
                trace!(stamp = %stamp, "Peer announced state");
                WireReply::Current(
                    self.reconciler
                        .deliver_remote(stamp, ChangeOrigin::Live)
                        .await?,
                )
            }
            WireMessage::SyncRequest => WireReply::Current(self.reconciler.sync_requested().await?),
            WireMessage::SessionRecorded(session) => self.accept_session(session),
        };
        Ok(reply)
    }

    fn accept_session(&self, session: RecordedSession) -> WireReply {
        if self.role.has_sensor() {
            warn!(session = %session.id, "Relayed session sent to the sensor node");
            return WireReply::Rejected(format!("{} does not store sessions", self.role));
        }

        let id = session.id;
        let duration_secs = session.duration_secs();
        let at = session.started_at;
        match self.uploads.submit(session) {
            SubmitOutcome::Queued => {
                info!(session = %id, duration_secs, "Received session from wrist");
                let _ = self.notices.send(Notice::SessionRecorded {
                    session_id: id,
                    duration_secs,
                    at,
                });
            }
            SubmitOutcome::Duplicate => {
                debug!(session = %id, "Relayed session already received");
            }
        }
        WireReply::SessionAccepted(id)
    }
}
