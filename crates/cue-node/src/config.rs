//! Configuration for a node

use std::fmt;
use std::time::Duration;

use cue_core::NodeRole;
use cue_recording::{RetryPolicy, UploadConfig};
use cue_sync::ReconcilerConfig;

use crate::relay::RELAY_USER_ID;

/// Configuration for a [`CueNode`](crate::CueNode)
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Which side of the pairing this node is
    pub role: NodeRole,
    /// Publish every local intent to the durable register
    pub mirror_durable: bool,
    /// Refuse local starts while the peer is unreachable
    pub require_reachable_to_start: bool,
    /// Reconciler inbox capacity
    pub command_buffer: usize,
    /// Capacity of the notice and resolution broadcast channels
    pub event_channel_capacity: usize,
    /// Session upload settings
    pub upload: UploadConfig,
}

impl NodeConfig {
    /// Defaults for the handheld node
    pub fn phone() -> Self {
        Self {
            role: NodeRole::Phone,
            mirror_durable: true,
            require_reachable_to_start: false,
            command_buffer: 256,
            event_channel_capacity: 64,
            upload: UploadConfig::default(),
        }
    }

    /// Defaults for the wearable node
    ///
    /// Finished sessions are relayed to the phone, which attributes them to
    /// its signed-in user.
    pub fn wrist() -> Self {
        Self {
            role: NodeRole::Wrist,
            upload: UploadConfig {
                user_id: Some(RELAY_USER_ID.to_string()),
                retry: RetryPolicy {
                    max_attempts: 8,
                    initial_delay: Duration::from_secs(2),
                    multiplier: 2.0,
                    max_delay: Duration::from_secs(120),
                },
                ..UploadConfig::default()
            },
            ..Self::phone()
        }
    }

    /// Defaults for `role`
    pub fn for_role(role: NodeRole) -> Self {
        match role {
            NodeRole::Phone => Self::phone(),
            NodeRole::Wrist => Self::wrist(),
        }
    }

    /// Set the user that sessions are stored under
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.upload.user_id = Some(user_id.into());
        self
    }

    /// Set the upload retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.upload.retry = retry;
        self
    }

    pub fn with_mirror_durable(mut self, mirror: bool) -> Self {
        self.mirror_durable = mirror;
        self
    }

    /// Refuse starts while the peer is unreachable
    pub fn with_start_guard(mut self, enabled: bool) -> Self {
        self.require_reachable_to_start = enabled;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Reconciler settings derived from this config
    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            role: self.role,
            command_buffer: self.command_buffer,
            resolution_buffer: self.event_channel_capacity,
            mirror_durable: self.mirror_durable,
            require_reachable_to_start: self.require_reachable_to_start,
        }
    }

    /// Validate the configuration and return any warnings
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let retry = &self.upload.retry;

        if retry.max_attempts == 0 {
            warnings.push(ConfigWarning::NoUploadAttempts);
        }
        if retry.initial_delay > retry.max_delay {
            warnings.push(ConfigWarning::InitialDelayExceedsMax);
        }
        if retry.multiplier < 1.0 {
            warnings.push(ConfigWarning::ShrinkingBackoff);
        }
        if self.role == NodeRole::Phone && self.upload.user_id.is_none() {
            warnings.push(ConfigWarning::MissingUserId);
        }
        if self.role == NodeRole::Wrist && self.require_reachable_to_start {
            warnings.push(ConfigWarning::StartGuardOnWrist);
        }
        if self.event_channel_capacity < 8 {
            warnings.push(ConfigWarning::SmallEventChannel);
        }

        warnings
    }

    /// Check if the configuration has no warnings
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::phone()
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// `max_attempts` is zero; every session is tried once and dropped
    NoUploadAttempts,
    /// Retry `initial_delay` exceeds `max_delay`
    InitialDelayExceedsMax,
    /// Retry multiplier below 1.0
    ShrinkingBackoff,
    /// Phone has no user to store sessions under
    MissingUserId,
    /// Start guard enabled on the sensor node
    StartGuardOnWrist,
    /// Event channel capacity is very small (< 8)
    SmallEventChannel,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::NoUploadAttempts => write!(f, "upload max_attempts is 0"),
            ConfigWarning::InitialDelayExceedsMax => {
                write!(f, "upload initial_delay exceeds max_delay")
            }
            ConfigWarning::ShrinkingBackoff => write!(f, "upload multiplier is below 1.0"),
            ConfigWarning::MissingUserId => {
                write!(f, "no user_id: sessions cannot be stored")
            }
            ConfigWarning::StartGuardOnWrist => {
                write!(f, "start guard enabled on the wrist node")
            }
            ConfigWarning::SmallEventChannel => {
                write!(f, "event_channel_capacity is very small (< 8)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let phone = NodeConfig::phone();
        assert_eq!(phone.role, NodeRole::Phone);
        assert!(phone.mirror_durable);
        assert!(!phone.require_reachable_to_start);

        let wrist = NodeConfig::wrist();
        assert_eq!(wrist.role, NodeRole::Wrist);
        assert_eq!(wrist.upload.user_id.as_deref(), Some(RELAY_USER_ID));
        assert!(wrist.is_valid());
    }

    #[test]
    fn test_phone_without_user_warns() {
        let warnings = NodeConfig::phone().validate();
        assert_eq!(warnings, vec![ConfigWarning::MissingUserId]);
        assert!(NodeConfig::phone().with_user_id("user-1").is_valid());
    }

    #[test]
    fn test_retry_warnings() {
        let config = NodeConfig::phone()
            .with_user_id("user-1")
            .with_retry_policy(RetryPolicy {
                max_attempts: 0,
                initial_delay: Duration::from_secs(10),
                multiplier: 0.5,
                max_delay: Duration::from_secs(1),
            });
        let warnings = config.validate();
        assert!(warnings.contains(&ConfigWarning::NoUploadAttempts));
        assert!(warnings.contains(&ConfigWarning::InitialDelayExceedsMax));
        assert!(warnings.contains(&ConfigWarning::ShrinkingBackoff));
    }

    #[test]
    fn test_start_guard_on_wrist_warns() {
        let config = NodeConfig::wrist().with_start_guard(true);
        assert_eq!(config.validate(), vec![ConfigWarning::StartGuardOnWrist]);
        assert!(config.validate()[0].to_string().contains("wrist"));
    }

    #[test]
    fn test_reconciler_config_follows_node_config() {
        let config = NodeConfig::phone()
            .with_mirror_durable(false)
            .with_start_guard(true);
        let reconciler = config.reconciler();
        assert_eq!(reconciler.role, NodeRole::Phone);
        assert!(!reconciler.mirror_durable);
        assert!(reconciler.require_reachable_to_start);
    }
}
