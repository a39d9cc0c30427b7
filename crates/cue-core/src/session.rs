//! Recorded sessions

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique token identifying a recorded session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short display form (for logging)
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A completed monitoring session
///
/// Produced once per observed active-to-inactive transition on the node
/// with sensor access. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSession {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RecordedSession {
    pub fn new(started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            id: SessionId::new(),
            started_at,
            duration,
        }
    }

    /// Build a session from its start and end instants
    ///
    /// A clock that moved backwards yields a zero duration.
    pub fn between(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        let duration = (ended_at - started_at).to_std().unwrap_or(Duration::ZERO);
        Self::new(started_at, duration)
    }

    /// Elapsed seconds, as the backend stores them
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    /// When the session finished
    pub fn ended_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .map(|elapsed| self.started_at + elapsed)
            .unwrap_or(self.started_at)
    }
}
