//! Core traits for Cue session sync
//!
//! ## Key Traits
//!
//! - [`SessionObserver`]: Receives resolved state transitions
//! - [`IntentSink`]: Accepts local intents (used for self-correction)
//! - [`Clock`]: Time abstraction for testability

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::event::{IntentOrigin, Resolution};

/// Handler for resolved state transitions
///
/// Called from inside the reconciler's serialization domain, exactly once per
/// change of the resolved value. Implementations must not block.
pub trait SessionObserver: Send + Sync {
    fn on_resolved(&self, resolution: &Resolution);
}

/// Destination for local intents
#[async_trait]
pub trait IntentSink: Send + Sync {
    /// Queue a local intent; returns false if the sink has shut down
    async fn submit_intent(&self, active: bool, origin: IntentOrigin) -> bool;
}

/// Time abstraction for testability
///
/// Session start and end times are read from a `Clock`, so tests can record
/// hours-long sessions without waiting.
pub trait Clock: Send + Sync {
    /// Get the current UTC datetime
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests
///
/// `now_utc` only moves when [`ManualClock::advance`] is called.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(utc: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(utc)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now_utc();
        assert_eq!(clock.now_utc(), start);

        clock.advance(Duration::from_secs(18_500));
        assert_eq!((clock.now_utc() - start).num_seconds(), 18_500);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at(DateTime::<Utc>::UNIX_EPOCH);
        let other = clock.clone();
        other.advance(Duration::from_secs(90));
        assert_eq!(clock.now_utc().timestamp(), 90);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now_utc();
        let b = clock.now_utc();
        assert!(b >= a);
    }
}
