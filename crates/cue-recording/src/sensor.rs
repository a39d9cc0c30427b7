//! Sensor collaborator
//!
//! The [`SensorSession`] trait wraps the platform's heart-rate capture. Only
//! the wrist node has one.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cue_core::{Clock, SensorError, SystemClock};

/// Platform sensor capture
#[async_trait]
pub trait SensorSession: Send + Sync {
    /// Start capturing; returns the capture start time
    async fn begin(&self) -> Result<DateTime<Utc>, SensorError>;

    /// Stop capturing
    async fn end(&self) -> Result<(), SensorError>;
}

/// In-memory sensor for tests and simulation
///
/// Supports failure injection, a configurable call latency, and counts
/// begin/end calls.
pub struct MockSensor<C: Clock = SystemClock> {
    clock: C,
    latency: Duration,
    running: AtomicBool,
    begins: AtomicUsize,
    ends: AtomicUsize,
    /// Failures returned by the next `begin` calls, oldest first
    begin_failures: Mutex<Vec<SensorError>>,
    fail_end: AtomicBool,
}

impl MockSensor<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MockSensor<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MockSensor<C> {
    /// Create a sensor that reads start times from `clock`
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
            running: AtomicBool::new(false),
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
            begin_failures: Mutex::new(Vec::new()),
            fail_end: AtomicBool::new(false),
        }
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next `begin` call fail with `error`
    pub fn fail_next_begin(&self, error: SensorError) {
        self.begin_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(error);
    }

    /// Make every `end` call fail (the capture still stops)
    pub fn set_fail_end(&self, fail: bool) {
        self.fail_end.store(fail, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of `begin` calls, failed ones included
    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn end_count(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl<C: Clock> SensorSession for MockSensor<C> {
    async fn begin(&self) -> Result<DateTime<Utc>, SensorError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let injected = {
            let mut failures = self
                .begin_failures
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        if let Some(error) = injected {
            return Err(error);
        }

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SensorError::AlreadyRunning);
        }
        Ok(self.clock.now_utc())
    }

    async fn end(&self) -> Result<(), SensorError> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(SensorError::NotRunning);
        }
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(SensorError::Hardware("failed to finish capture".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cue_core::ManualClock;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_begin_end_cycle() {
        let clock = ManualClock::new();
        let sensor = MockSensor::with_clock(clock.clone());

        let started = assert_ok!(sensor.begin().await);
        assert_eq!(started, clock.now_utc());
        assert!(sensor.is_running());

        assert_ok!(sensor.end().await);
        assert!(!sensor.is_running());
        assert_eq!(sensor.begin_count(), 1);
        assert_eq!(sensor.end_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let sensor = MockSensor::new();
        sensor.fail_next_begin(SensorError::NotAuthorized);

        let err = assert_err!(sensor.begin().await);
        assert!(matches!(err, SensorError::NotAuthorized));
        assert!(!sensor.is_running());

        assert_ok!(sensor.begin().await);
    }

    #[tokio::test]
    async fn test_double_begin_is_rejected() {
        let sensor = MockSensor::new();
        assert_ok!(sensor.begin().await);
        assert!(matches!(
            sensor.begin().await,
            Err(SensorError::AlreadyRunning)
        ));
        assert_ok!(sensor.end().await);
        assert!(matches!(sensor.end().await, Err(SensorError::NotRunning)));
    }
}
