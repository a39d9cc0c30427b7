//! Scripted pairing scenarios
//!
//! Each scenario drives a fresh phone/wrist pair through one situation and
//! checks that the wrist records exactly when both sides agree it should.

use std::sync::Arc;
use std::time::Duration;

use anyhow::ensure;
use clap::ValueEnum;
use derive_more::Display;
use tracing::info;

use cue_core::{ChangeOrigin, ManualClock, MockLink, NodeRole, PersistenceError, ResolvedState};
use cue_recording::{MemorySessionStore, MockSensor, RecorderState};

use crate::harness::{Pair, launch_phone, launch_wrist, poll_until, wait_recording, wait_resolved};

/// Length of the long session in [`Scenario::LongSession`]
pub const LONG_SESSION: Duration = Duration::from_secs(18_500);

/// The scripted scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
pub enum Scenario {
    /// Phone starts a session with the wrist in range
    #[value(name = "a")]
    #[display("A: start while reachable")]
    ReachableStart,
    /// Phone starts a session before the wrist app is running
    #[value(name = "b")]
    #[display("B: start before the wrist launches")]
    DeferredStart,
    /// A stale announce arrives after the wrist stopped the session
    #[value(name = "c")]
    #[display("C: late stale message")]
    StaleMessage,
    /// A five hour session whose upload fails twice
    #[value(name = "d")]
    #[display("D: long session with flaky upload")]
    LongSession,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::ReachableStart,
        Scenario::DeferredStart,
        Scenario::StaleMessage,
        Scenario::LongSession,
    ];
}

/// Outcome of a scenario run
#[derive(Debug, Clone, Display)]
#[display(
    "{scenario} => phone {phone}, wrist {wrist}, recorder {recorder}, {sensor_starts} sensor start(s), {stored_sessions} stored session(s)"
)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub phone: ResolvedState,
    pub wrist: ResolvedState,
    pub recorder: RecorderState,
    pub sensor_starts: usize,
    pub stored_sessions: usize,
}

impl ScenarioReport {
    async fn collect(scenario: Scenario, pair: Pair) -> anyhow::Result<Self> {
        let report = Self {
            scenario,
            phone: pair.phone.resolved().await?,
            wrist: pair.wrist.resolved().await?,
            recorder: pair.wrist.recorder_state().unwrap_or(RecorderState::Idle),
            sensor_starts: pair.sensor.begin_count(),
            stored_sessions: pair.store.stored().len(),
        };
        pair.shutdown().await?;
        Ok(report)
    }
}

/// Run one scenario on a fresh pair
pub async fn run(scenario: Scenario) -> anyhow::Result<ScenarioReport> {
    info!(%scenario, "Running scenario");
    let report = match scenario {
        Scenario::ReachableStart => reachable_start().await?,
        Scenario::DeferredStart => deferred_start().await?,
        Scenario::StaleMessage => stale_message().await?,
        Scenario::LongSession => long_session().await?,
    };
    info!(%report, "Scenario finished");
    Ok(report)
}

async fn reachable_start() -> anyhow::Result<ScenarioReport> {
    let pair = Pair::launch(MockLink::new()).await?;

    pair.phone.propose(true).await?;
    wait_recording(&pair.wrist, true).await?;
    wait_resolved(&pair.wrist, ResolvedState::Active).await?;

    ensure!(pair.sensor.begin_count() == 1, "sensor started more than once");
    ScenarioReport::collect(Scenario::ReachableStart, pair).await
}

async fn deferred_start() -> anyhow::Result<ScenarioReport> {
    let link = MockLink::new();
    let store = Arc::new(MemorySessionStore::new());
    let phone = launch_phone(&link, Arc::clone(&store)).await?;
    link.activate(NodeRole::Phone);

    let stamp = phone.propose(true).await?;
    info!(%stamp, "Phone started with no wrist app running");

    let clock = ManualClock::new();
    let sensor = Arc::new(MockSensor::with_clock(clock.clone()));
    let wrist = launch_wrist(&link, Arc::clone(&sensor), clock.clone()).await?;
    link.activate(NodeRole::Wrist);

    wait_recording(&wrist, true).await?;
    let pair = Pair {
        link,
        clock,
        sensor,
        store,
        phone,
        wrist,
    };
    ensure!(
        pair.settled().await? == ResolvedState::Active,
        "pair did not settle active"
    );
    ScenarioReport::collect(Scenario::DeferredStart, pair).await
}

async fn stale_message() -> anyhow::Result<ScenarioReport> {
    let pair = Pair::launch(MockLink::new()).await?;

    let start = pair.phone.propose(true).await?;
    wait_recording(&pair.wrist, true).await?;

    let stop = pair.wrist.propose(false).await?;
    info!(%start, %stop, "Replaying the phone's start after the wrist stopped");
    let held = pair
        .wrist
        .reconciler()
        .deliver_remote(start, ChangeOrigin::Live)
        .await?;
    ensure!(held == Some(stop), "stale start was not answered with the stop");

    wait_recording(&pair.wrist, false).await?;
    wait_resolved(&pair.phone, ResolvedState::Inactive).await?;
    ensure!(pair.sensor.begin_count() == 1, "stale start restarted the sensor");
    ScenarioReport::collect(Scenario::StaleMessage, pair).await
}

async fn long_session() -> anyhow::Result<ScenarioReport> {
    let pair = Pair::launch(MockLink::new()).await?;
    pair.store.fail_next(2, PersistenceError::Server(503));

    pair.phone.propose(true).await?;
    wait_recording(&pair.wrist, true).await?;

    pair.clock.advance(LONG_SESSION);
    pair.phone.propose(false).await?;
    wait_recording(&pair.wrist, false).await?;

    let store = Arc::clone(&pair.store);
    poll_until("session upload", || !store.stored().is_empty()).await?;

    let stored = pair.store.stored();
    ensure!(stored.len() == 1, "expected one stored session, got {}", stored.len());
    ensure!(
        stored[0].duration == LONG_SESSION,
        "stored duration {:?}",
        stored[0].duration
    );
    ensure!(pair.store.attempts() == 3, "expected three upload attempts");
    ScenarioReport::collect(Scenario::LongSession, pair).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_scenario_passes() {
        for scenario in Scenario::ALL {
            let report = tokio_test::assert_ok!(run(scenario).await);
            assert_eq!(report.phone, report.wrist, "{scenario}");
        }
    }

    #[tokio::test]
    async fn test_long_session_report() {
        let report = tokio_test::assert_ok!(run(Scenario::LongSession).await);
        assert_eq!(report.stored_sessions, 1);
        assert_eq!(report.phone, ResolvedState::Inactive);
        assert_eq!(report.recorder, RecorderState::Idle);
    }

    #[test]
    fn test_scenario_names() {
        let names: Vec<_> = Scenario::value_variants()
            .iter()
            .filter_map(|s| s.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }
}
