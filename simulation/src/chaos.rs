//! Randomized toggling under a flapping link
//!
//! Both users toggle at random while the link drops in and out. Once the
//! link is restored, both nodes must hold the greatest stamp either side
//! issued and the wrist must be recording exactly when that stamp is active.

use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure};
use derive_more::Display;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use cue_core::{MockLink, ResolvedState, StateStamp};

use crate::harness::{Pair, SETTLE_TIMEOUT, wait_recording};

/// Parameters of a chaos run
#[derive(Debug, Clone, Copy)]
pub struct ChaosConfig {
    /// Number of random actions
    pub steps: usize,
    pub seed: u64,
    /// Upper bound of the pause between actions
    pub max_pause: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            steps: 200,
            seed: 7,
            max_pause: Duration::from_millis(5),
        }
    }
}

/// Outcome of a chaos run
#[derive(Debug, Clone, Display)]
#[display(
    "seed {seed}: {steps} steps, {toggles} toggles, {link_changes} link changes; settled {settled} after {settle_time:?}, {stored_sessions} session(s) stored"
)]
pub struct ChaosReport {
    pub seed: u64,
    pub steps: usize,
    pub toggles: usize,
    pub link_changes: usize,
    pub settled: ResolvedState,
    pub settle_time: Duration,
    pub stored_sessions: usize,
}

/// Run a chaos schedule and check that the pair converges
pub async fn run(config: ChaosConfig) -> anyhow::Result<ChaosReport> {
    let pair = Pair::launch(MockLink::new()).await?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut issued: Vec<StateStamp> = Vec::new();
    let mut link_changes = 0;

    info!(seed = config.seed, steps = config.steps, "Starting chaos run");

    for step in 0..config.steps {
        match rng.random_range(0..4) {
            0 => {
                let reachable = rng.random_bool(0.5);
                debug!(step, reachable, "Link change");
                pair.link.set_reachable(reachable);
                link_changes += 1;
            }
            1 => issued.push(pair.phone.toggle().await?),
            2 => issued.push(pair.wrist.toggle().await?),
            _ => {
                let pause = rng.random_range(0..=config.max_pause.as_millis() as u64);
                sleep(Duration::from_millis(pause)).await;
            }
        }
    }

    pair.link.set_reachable(true);
    let expected = issued.iter().copied().max_by(|a, b| a.order(b));
    info!(
        toggles = issued.len(),
        expected = ?expected,
        "Link restored, waiting for convergence"
    );

    let started = Instant::now();
    timeout(SETTLE_TIMEOUT, async {
        loop {
            let phone = pair.phone.snapshot().await?;
            let wrist = pair.wrist.snapshot().await?;
            if phone.stamp == expected && wrist.stamp == expected {
                return Ok::<_, anyhow::Error>(());
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("pair did not converge on {expected:?}"))??;
    let settle_time = started.elapsed();

    let settled = pair.settled().await?;
    wait_recording(&pair.wrist, settled == ResolvedState::Active).await?;
    let want = expected.map_or(ResolvedState::Unknown, |s| ResolvedState::from_active(s.active));
    ensure!(settled == want, "settled {settled} but expected {want}");

    let report = ChaosReport {
        seed: config.seed,
        steps: config.steps,
        toggles: issued.len(),
        link_changes,
        settled,
        settle_time,
        stored_sessions: pair.store.stored().len(),
    };
    pair.shutdown().await?;
    info!(%report, "Chaos run converged");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chaos_converges_for_several_seeds() {
        for seed in [1, 7, 42] {
            let report = tokio_test::assert_ok!(
                run(ChaosConfig {
                    steps: 60,
                    seed,
                    ..ChaosConfig::default()
                })
                .await
            );
            assert_eq!(report.seed, seed);
            assert_eq!(report.steps, 60);
        }
    }

    #[tokio::test]
    async fn test_no_steps_stays_unknown() {
        let report = run(ChaosConfig {
            steps: 0,
            ..ChaosConfig::default()
        })
        .await
        .unwrap();
        assert_eq!(report.settled, ResolvedState::Unknown);
        assert_eq!(report.toggles, 0);
    }
}
