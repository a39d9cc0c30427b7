//! Session relay from the wrist to the phone
//!
//! The wrist has no reliable network access. Its upload pipeline stores
//! finished sessions through [`PeerRelayStore`], which forwards each one to
//! the phone over the live channel. The phone acknowledges once the session
//! is in its own upload pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use cue_core::{PeerTransport, PersistenceError, RecordedSession, WireMessage, WireReply};
use cue_recording::SessionStore;

/// Placeholder user for relayed sessions; the phone stores them under its own user
pub const RELAY_USER_ID: &str = "paired-phone";

/// [`SessionStore`] that hands sessions to the paired phone
pub struct PeerRelayStore {
    transport: Arc<dyn PeerTransport>,
}

impl PeerRelayStore {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl SessionStore for PeerRelayStore {
    async fn record_session(
        &self,
        _user_id: &str,
        session: &RecordedSession,
    ) -> Result<(), PersistenceError> {
        let payload = WireMessage::SessionRecorded(session.clone())
            .to_bytes()
            .map_err(|e| PersistenceError::Relay(e.to_string()))?;

        let reply = self
            .transport
            .send_live(payload)
            .await
            .map_err(|e| PersistenceError::Relay(e.to_string()))?;

        match WireReply::from_bytes(&reply) {
            Ok(WireReply::SessionAccepted(id)) if id == session.id => {
                debug!(session = %session.id, "Phone accepted relayed session");
                Ok(())
            }
            Ok(WireReply::Rejected(reason)) => Err(PersistenceError::Relay(reason)),
            Ok(other) => Err(PersistenceError::Relay(format!(
                "unexpected reply: {other:?}"
            ))),
            Err(e) => Err(PersistenceError::Relay(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use cue_core::{MockLink, NodeRole, TransportEvent};

    #[tokio::test]
    async fn test_relay_fails_when_unreachable() {
        let link = MockLink::new();
        let (_phone, wrist) = link.pair();
        link.activate(NodeRole::Wrist);

        let store = PeerRelayStore::new(wrist);
        let session = RecordedSession::new(Utc::now(), Duration::from_secs(5));
        let err = store.record_session(RELAY_USER_ID, &session).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Relay(_)));
    }

    #[tokio::test]
    async fn test_relay_succeeds_on_matching_ack() {
        let link = MockLink::new();
        let (phone, wrist) = link.pair();
        link.activate(NodeRole::Phone);
        link.activate(NodeRole::Wrist);

        // Minimal phone side: acknowledge whatever session arrives
        tokio::spawn(async move {
            while let Ok(event) = phone.next_event().await {
                if let TransportEvent::Live { payload, reply } = event {
                    if let Ok(WireMessage::SessionRecorded(session)) =
                        WireMessage::from_bytes(&payload)
                    {
                        let ack = WireReply::SessionAccepted(session.id);
                        reply.send(ack.to_bytes().unwrap());
                    }
                }
            }
        });

        let store = PeerRelayStore::new(wrist);
        let session = RecordedSession::new(Utc::now(), Duration::from_secs(5));
        store.record_session(RELAY_USER_ID, &session).await.unwrap();
    }
}
