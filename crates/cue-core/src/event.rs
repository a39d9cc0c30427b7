//! Resolution and notice events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionId;
use crate::state::{ResolvedState, StateStamp};

/// Why a local intent was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentOrigin {
    /// The user toggled the control
    User,
    /// The sensor could not be started and shared state must be corrected
    SelfCorrection,
}

/// Where a resolved state change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOrigin {
    Local(IntentOrigin),
    /// Live message from the peer
    Live,
    /// Durable register delivery
    Durable,
    /// Durable value surfaced on activation
    Activation,
    /// Peer's reply to one of our live requests
    Reply,
}

impl ChangeOrigin {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// A change of the resolved session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The state before the change
    pub previous: ResolvedState,
    /// The canonical value now held
    pub stamp: StateStamp,
    pub origin: ChangeOrigin,
}

impl Resolution {
    pub fn active(&self) -> bool {
        self.stamp.active
    }

    pub fn state(&self) -> ResolvedState {
        ResolvedState::from_active(self.stamp.active)
    }
}

/// One-time user-visible notices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notice {
    /// A start was refused because the peer is out of reach
    PeerUnreachable,
    /// The sensor could not be started; the session was switched back off
    SensorUnavailable { reason: String },
    /// A finished session could not be stored after all retries
    UploadAbandoned {
        session_id: SessionId,
        attempts: u32,
        error: String,
    },
    /// A finished session reached durable storage
    SessionRecorded {
        session_id: SessionId,
        duration_secs: f64,
        at: DateTime<Utc>,
    },
}
