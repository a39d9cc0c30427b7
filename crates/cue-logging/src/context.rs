//! Node context for multi-instance logging
//!
//! A phone and a wrist node often run in the same process (tests, the
//! simulation). [`NodeContext`] builds the `node` span that every task of a
//! node is instrumented with, so each log line says which node wrote it.

use std::fmt;

use cue_core::NodeRole;
use tracing::Span;
use uuid::Uuid;

/// Identity of one running node for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeContext {
    pub role: NodeRole,
    /// Unique per process launch; distinguishes a node from its own restarts
    pub instance_id: Uuid,
}

impl NodeContext {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            instance_id: Uuid::new_v4(),
        }
    }

    /// First 8 characters of the instance id
    pub fn short_instance(&self) -> String {
        self.instance_id.to_string()[..8].to_string()
    }

    /// The span to run this node's tasks in
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "node",
            role = %self.role,
            instance = %self.short_instance()
        )
    }
}

impl fmt::Display for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.short_instance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_unique() {
        let a = NodeContext::new(NodeRole::Phone);
        let b = NodeContext::new(NodeRole::Phone);
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(a.short_instance().len(), 8);
    }

    #[test]
    fn test_display() {
        let ctx = NodeContext::new(NodeRole::Wrist);
        let shown = ctx.to_string();
        assert!(shown.starts_with("wrist#"));
        assert!(shown.ends_with(&ctx.short_instance()));
    }

    #[test]
    fn test_span_without_subscriber_is_usable() {
        let ctx = NodeContext::new(NodeRole::Phone);
        let span = ctx.span();
        let _entered = span.enter();
        tracing::info!("inside node span");
    }
}
