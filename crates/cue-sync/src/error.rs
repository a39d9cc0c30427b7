//! Reconciler error types

use thiserror::Error;

use cue_core::ProtocolError;

/// Errors returned by the reconciler
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The reconciler task has stopped
    #[error("Reconciler is not running")]
    Closed,

    /// A start was refused because the peer cannot be reached
    #[error("Peer unreachable: refusing to start a session")]
    PeerUnreachable,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ReconcilerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ReconcilerError::Closed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ReconcilerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ReconcilerError::Closed
    }
}

/// Result type alias for reconciler operations
pub type ReconcilerResult<T> = Result<T, ReconcilerError>;
