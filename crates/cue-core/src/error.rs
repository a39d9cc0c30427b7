//! Error types for Cue session sync

use thiserror::Error;

/// Top-level error type for the session sync core
#[derive(Debug, Error)]
pub enum CueError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors raised by the proximity transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer is not currently reachable over the live channel
    #[error("Peer unreachable")]
    Unreachable,

    /// The peer accepted the message but never replied
    #[error("Live reply timed out after {0}ms")]
    Timeout(u64),

    /// The transport session has not finished activating
    #[error("Transport not activated")]
    NotActivated,

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

impl TransportError {
    /// Whether the durable channel should carry the value instead
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::Unreachable | Self::Timeout(_) | Self::NotActivated
        )
    }
}

/// Errors related to the wire protocol
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<postcard::Error> for ProtocolError {
    fn from(e: postcard::Error) -> Self {
        ProtocolError::InvalidMessageFormat(e.to_string())
    }
}

/// Errors reported by the sensor collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("Sensor authorization denied")]
    NotAuthorized,

    #[error("A sensor session is already running")]
    AlreadyRunning,

    #[error("No sensor session is running")]
    NotRunning,

    #[error("Sensor hardware failure: {0}")]
    Hardware(String),
}

/// Errors reported by the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// No user identity is available to attribute the session to
    #[error("Cannot record session: user id not available")]
    MissingUser,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(u16),

    #[error("Relay failed: {0}")]
    Relay(String),
}

/// Result type alias for core operations
pub type CueResult<T> = Result<T, CueError>;
