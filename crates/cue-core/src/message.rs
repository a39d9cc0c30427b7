//! Wire messages exchanged between the two nodes
//!
//! Every payload handed to the transport is a postcard-encoded [`WireFrame`]
//! carrying a protocol version. The durable register always holds an
//! encoded [`StateStamp`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::session::{RecordedSession, SessionId};
use crate::state::StateStamp;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Requests sent over the live channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Announce the sender's canonical session state
    Announce(StateStamp),
    /// Ask the peer for its canonical state (sender is still unknown)
    SyncRequest,
    /// Hand a finished session to the node that reaches the network
    SessionRecorded(RecordedSession),
}

/// Replies to a [`WireMessage`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireReply {
    /// The responder's canonical state after applying the request
    Current(Option<StateStamp>),
    /// The relayed session was accepted for upload
    SessionAccepted(SessionId),
    /// The request could not be handled by this node
    Rejected(String),
}

/// Versioned envelope around any wire payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFrame<T> {
    version: u8,
    body: T,
}

fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, ProtocolError> {
    postcard::to_allocvec(&WireFrame {
        version: WIRE_VERSION,
        body,
    })
    .map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    let frame: WireFrame<T> = postcard::from_bytes(data)?;
    if frame.version != WIRE_VERSION {
        return Err(ProtocolError::InvalidMessageFormat(format!(
            "unsupported wire version {} (expected {})",
            frame.version, WIRE_VERSION
        )));
    }
    Ok(frame.body)
}

impl WireMessage {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }
}

impl WireReply {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }
}

impl StateStamp {
    /// Encode for the durable register
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Decode a durable register value
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(data)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::identity::NodeRole;
    use crate::state::Revision;

    #[test]
    fn test_session_recorded_survives_encoding() {
        let session = RecordedSession::new(Utc::now(), Duration::from_secs(18_500));
        let bytes = WireMessage::SessionRecorded(session.clone())
            .to_bytes()
            .unwrap();

        match WireMessage::from_bytes(&bytes).unwrap() {
            WireMessage::SessionRecorded(decoded) => {
                assert_eq!(decoded.id, session.id);
                assert_eq!(decoded.duration, session.duration);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(WireMessage::from_bytes(&[0xff, 0xff, 0xff]).is_err());
        assert!(StateStamp::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let stamp = StateStamp::new(true, Revision(2), NodeRole::Wrist);
        let mut bytes = stamp.to_bytes().unwrap();
        bytes[0] = WIRE_VERSION + 1;

        let err = StateStamp::from_bytes(&bytes).unwrap_err();
        assert!(format!("{}", err).contains("unsupported wire version"));
    }
}
