//! Replicated session state
//!
//! One logical boolean ("is a monitoring session active?") lives as two local
//! copies, one per node. Each copy carries a [`Revision`] so that the two
//! replicas can order concurrent writes deterministically.

use std::cmp::Ordering;
use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::identity::NodeRole;

/// Logical clock for session state writes
///
/// Advances on every local intent and jumps forward when a newer remote
/// value is adopted. Never decreases within a process lifetime.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[display("r{_0}")]
pub struct Revision(pub u64);

impl Revision {
    /// Revision every node starts at after a cold launch
    pub const ZERO: Self = Self(0);

    /// The revision following this one
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// A session state value as it travels between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateStamp {
    /// Whether a session is active
    pub active: bool,
    /// Revision at which the value was written
    pub revision: Revision,
    /// Node that wrote the value
    pub writer: NodeRole,
}

impl StateStamp {
    pub fn new(active: bool, revision: Revision, writer: NodeRole) -> Self {
        Self {
            active,
            revision,
            writer,
        }
    }

    /// Total order over stamps: revision first, then inactive over active,
    /// then writer rank
    ///
    /// Two intents written at the same revision were concurrent; a stop wins
    /// over a start whichever node wrote it.
    pub fn order(&self, other: &Self) -> Ordering {
        self.revision
            .cmp(&other.revision)
            .then_with(|| other.active.cmp(&self.active))
            .then_with(|| self.writer.rank().cmp(&other.writer.rank()))
    }

    /// Whether this stamp wins over `other` under last-writer-wins
    pub fn supersedes(&self, other: &Self) -> bool {
        self.order(other) == Ordering::Greater
    }
}

impl fmt::Display for StateStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/{}",
            if self.active { "active" } else { "inactive" },
            self.revision,
            self.writer
        )
    }
}

/// The canonical session state held by one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionActiveState {
    pub active: bool,
    pub revision: Revision,
    /// Whether this node wrote the value
    pub local_origin: bool,
}

impl SessionActiveState {
    /// The state every node starts from
    pub fn initial() -> Self {
        Self {
            active: false,
            revision: Revision::ZERO,
            local_origin: true,
        }
    }

    /// Interpret a stamp from the point of view of `local`
    pub fn from_stamp(stamp: StateStamp, local: NodeRole) -> Self {
        Self {
            active: stamp.active,
            revision: stamp.revision,
            local_origin: stamp.writer == local,
        }
    }

    /// Wire form of this state, given which node is holding it
    pub fn to_stamp(&self, local: NodeRole) -> StateStamp {
        let writer = if self.local_origin { local } else { local.peer() };
        StateStamp::new(self.active, self.revision, writer)
    }
}

impl Default for SessionActiveState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Resolved view of the shared state
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolvedState {
    /// Cold start: no local action or remote value observed yet
    #[display("unknown")]
    Unknown,
    #[display("active")]
    Active,
    #[display("inactive")]
    Inactive,
}

impl ResolvedState {
    pub fn from_active(active: bool) -> Self {
        if active { Self::Active } else { Self::Inactive }
    }

    /// The boolean value, if known
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unknown => None,
            Self::Active => Some(true),
            Self::Inactive => Some(false),
        }
    }

    /// Active, treating `Unknown` as inactive
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Local view of the remote peer's link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerLinkStatus {
    /// Transport finished its activation handshake
    pub activated: bool,
    /// Peer is reachable over the live channel right now
    pub reachable: bool,
}

impl PeerLinkStatus {
    /// Whether a live send has any chance of succeeding
    pub fn can_send_live(&self) -> bool {
        self.activated && self.reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_next() {
        assert_eq!(Revision::ZERO.next(), Revision(1));
        assert_eq!(Revision(u64::MAX).next(), Revision(u64::MAX));
        assert_eq!(format!("{}", Revision(7)), "r7");
    }

    #[test]
    fn test_higher_revision_supersedes() {
        let old = StateStamp::new(true, Revision(1), NodeRole::Wrist);
        let new = StateStamp::new(false, Revision(2), NodeRole::Phone);
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
    }

    #[test]
    fn test_concurrent_stop_beats_start() {
        let wrist_start = StateStamp::new(true, Revision(3), NodeRole::Wrist);
        let phone_stop = StateStamp::new(false, Revision(3), NodeRole::Phone);
        assert!(phone_stop.supersedes(&wrist_start));
        assert!(!wrist_start.supersedes(&phone_stop));

        let phone_start = StateStamp::new(true, Revision(3), NodeRole::Phone);
        let wrist_stop = StateStamp::new(false, Revision(3), NodeRole::Wrist);
        assert!(wrist_stop.supersedes(&phone_start));
        assert!(!wrist_stop.supersedes(&wrist_stop));
    }

    #[test]
    fn test_same_value_tie_broken_by_writer_rank() {
        let phone = StateStamp::new(true, Revision(3), NodeRole::Phone);
        let wrist = StateStamp::new(true, Revision(3), NodeRole::Wrist);
        assert!(wrist.supersedes(&phone));
        assert!(!phone.supersedes(&wrist));
    }

    #[test]
    fn test_reused_revision_prefers_inactive() {
        let on = StateStamp::new(true, Revision(2), NodeRole::Wrist);
        let off = StateStamp::new(false, Revision(2), NodeRole::Wrist);
        assert!(off.supersedes(&on));
        assert!(!on.supersedes(&off));
    }

    #[test]
    fn test_stamp_conversion_keeps_writer() {
        let stamp = StateStamp::new(true, Revision(4), NodeRole::Phone);

        let held_by_wrist = SessionActiveState::from_stamp(stamp, NodeRole::Wrist);
        assert!(!held_by_wrist.local_origin);
        assert_eq!(held_by_wrist.to_stamp(NodeRole::Wrist), stamp);

        let held_by_phone = SessionActiveState::from_stamp(stamp, NodeRole::Phone);
        assert!(held_by_phone.local_origin);
        assert_eq!(held_by_phone.to_stamp(NodeRole::Phone), stamp);
    }

    #[test]
    fn test_resolved_state() {
        assert_eq!(ResolvedState::Unknown.as_bool(), None);
        assert!(!ResolvedState::Unknown.is_active());
        assert_eq!(ResolvedState::from_active(true), ResolvedState::Active);
        assert_eq!(ResolvedState::Inactive.as_bool(), Some(false));
    }

    #[test]
    fn test_link_status() {
        let mut status = PeerLinkStatus::default();
        assert!(!status.can_send_live());
        status.activated = true;
        status.reachable = true;
        assert!(status.can_send_live());
    }
}
