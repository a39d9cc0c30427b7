//! Error types for the node

use thiserror::Error;

use cue_core::{ProtocolError, TransportError};
use cue_sync::ReconcilerError;

/// Errors that can occur while running a node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Reconciler rejected the request or has stopped
    #[error("Reconciler error: {0}")]
    Reconciler(#[from] ReconcilerError),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task failed to finish
    #[error("Task error: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for NodeError {
    fn from(e: tokio::task::JoinError) -> Self {
        NodeError::Task(e.to_string())
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
