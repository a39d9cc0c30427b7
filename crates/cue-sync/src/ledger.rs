//! Session state ledger
//!
//! Pure merge logic for the replicated session flag. The ledger holds the
//! node's [`SessionActiveState`] plus whether it has been resolved at all,
//! and applies local intents and remote stamps under last-writer-wins.
//! It performs no I/O; the reconciler drives it.

use cue_core::{NodeRole, ResolvedState, SessionActiveState, StateStamp};

/// Result of applying a local intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalUpdate {
    /// The stamp to propagate to the peer
    pub stamp: StateStamp,
    /// Resolved state before the intent
    pub previous: ResolvedState,
}

impl LocalUpdate {
    /// Whether the resolved value changed
    pub fn changed(&self) -> bool {
        self.previous != ResolvedState::from_active(self.stamp.active)
    }
}

/// Result of applying a remote stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The remote value won and is now held
    Adopted { previous: ResolvedState },
    /// The remote value is the one already held
    Duplicate,
    /// The held value is newer; the peer should learn `current`
    Stale { current: StateStamp },
}

impl RemoteOutcome {
    /// Whether the resolved value changed
    pub fn changed(&self, now: ResolvedState) -> bool {
        matches!(self, Self::Adopted { previous } if *previous != now)
    }
}

/// The node's copy of the shared session flag
#[derive(Debug, Clone)]
pub struct SessionLedger {
    role: NodeRole,
    state: SessionActiveState,
    resolved: ResolvedState,
}

impl SessionLedger {
    /// A ledger in the cold-start `Unknown` state
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            state: SessionActiveState::initial(),
            resolved: ResolvedState::Unknown,
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn resolved(&self) -> ResolvedState {
        self.resolved
    }

    pub fn state(&self) -> SessionActiveState {
        self.state
    }

    /// The held value in wire form, or `None` while unresolved
    pub fn stamp(&self) -> Option<StateStamp> {
        if self.resolved.is_unknown() {
            None
        } else {
            Some(self.state.to_stamp(self.role))
        }
    }

    /// Apply a local intent
    ///
    /// The revision always advances, even when the value does not change, so
    /// a repeated intent still overrides anything older on the peer.
    pub fn propose(&mut self, active: bool) -> LocalUpdate {
        let previous = self.resolved;
        self.state = SessionActiveState {
            active,
            revision: self.state.revision.next(),
            local_origin: true,
        };
        self.resolved = ResolvedState::from_active(active);

        LocalUpdate {
            stamp: self.state.to_stamp(self.role),
            previous,
        }
    }

    /// Apply a stamp received from the peer
    pub fn apply_remote(&mut self, stamp: StateStamp) -> RemoteOutcome {
        let Some(current) = self.stamp() else {
            return self.adopt(stamp);
        };

        if stamp == current {
            RemoteOutcome::Duplicate
        } else if stamp.supersedes(&current) {
            self.adopt(stamp)
        } else {
            RemoteOutcome::Stale { current }
        }
    }

    fn adopt(&mut self, stamp: StateStamp) -> RemoteOutcome {
        let previous = self.resolved;
        let mut state = SessionActiveState::from_stamp(stamp, self.role);
        // Revisions never move backwards, even when adopting from Unknown.
        state.revision = state.revision.max(self.state.revision);
        self.state = state;
        self.resolved = ResolvedState::from_active(stamp.active);
        RemoteOutcome::Adopted { previous }
    }
}
