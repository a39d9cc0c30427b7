//! Node roles
//!
//! Exactly two nodes take part in a pairing. Each knows its own role and
//! infers the peer's as the opposite one.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Which side of the pairing a node is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Handheld node: reaches the network, has no sensor access
    Phone,
    /// Wearable node: owns the biometric sensor
    Wrist,
}

impl NodeRole {
    /// The role of the other node in the pairing
    pub fn peer(self) -> Self {
        match self {
            Self::Phone => Self::Wrist,
            Self::Wrist => Self::Phone,
        }
    }

    /// Whether this node can start and stop sensor acquisition
    pub fn has_sensor(self) -> bool {
        matches!(self, Self::Wrist)
    }

    /// Rank used to break revision ties
    ///
    /// The sensor-bearing node outranks the other one: the phone has no
    /// independent way to validate what the wrist is actually doing.
    pub fn rank(self) -> u8 {
        match self {
            Self::Phone => 0,
            Self::Wrist => 1,
        }
    }

    /// Short form for logging
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Wrist => "wrist",
        }
    }
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_is_opposite() {
        assert_eq!(NodeRole::Phone.peer(), NodeRole::Wrist);
        assert_eq!(NodeRole::Wrist.peer(), NodeRole::Phone);
    }

    #[test]
    fn test_only_wrist_has_sensor() {
        assert!(NodeRole::Wrist.has_sensor());
        assert!(!NodeRole::Phone.has_sensor());
        assert!(NodeRole::Wrist.rank() > NodeRole::Phone.rank());
    }
}
