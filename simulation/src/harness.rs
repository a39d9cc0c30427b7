//! A phone and a wrist node sharing one mock link

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::time::{sleep, timeout};
use tracing::info;

use cue_core::{ManualClock, MockLink, NodeRole, ResolvedState};
use cue_node::{Collaborators, CueNode, NodeConfig};
use cue_recording::{MemorySessionStore, MockSensor, RecorderState, RetryPolicy};

/// How long any single wait may take before a run is declared stuck
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// User the simulated phone is signed in as
pub const SIM_USER: &str = "sim-user";

/// Start the phone node on `link`
///
/// The phone retries uploads on a fast schedule so runs finish quickly.
pub async fn launch_phone(link: &MockLink, store: Arc<MemorySessionStore>) -> anyhow::Result<CueNode> {
    let config = NodeConfig::phone()
        .with_user_id(SIM_USER)
        .with_retry_policy(RetryPolicy::fast());
    CueNode::start(
        config,
        link.endpoint(NodeRole::Phone),
        Collaborators::new().with_store(store),
    )
    .await
    .context("starting phone node")
}

/// Start the wrist node on `link`, recording with `sensor`
pub async fn launch_wrist(
    link: &MockLink,
    sensor: Arc<MockSensor<ManualClock>>,
    clock: ManualClock,
) -> anyhow::Result<CueNode> {
    CueNode::start(
        NodeConfig::wrist(),
        link.endpoint(NodeRole::Wrist),
        Collaborators::new().with_sensor(sensor).with_clock(clock),
    )
    .await
    .context("starting wrist node")
}

/// Both nodes of a pairing plus the fakes behind them
pub struct Pair {
    pub link: MockLink,
    pub clock: ManualClock,
    pub sensor: Arc<MockSensor<ManualClock>>,
    pub store: Arc<MemorySessionStore>,
    pub phone: CueNode,
    pub wrist: CueNode,
}

impl Pair {
    /// Start both nodes on `link` and activate them
    pub async fn launch(link: MockLink) -> anyhow::Result<Self> {
        let clock = ManualClock::new();
        let sensor = Arc::new(MockSensor::with_clock(clock.clone()));
        let store = Arc::new(MemorySessionStore::new());

        let phone = launch_phone(&link, Arc::clone(&store)).await?;
        let wrist = launch_wrist(&link, Arc::clone(&sensor), clock.clone()).await?;
        link.activate(NodeRole::Phone);
        link.activate(NodeRole::Wrist);
        info!(reachable = link.is_reachable(), "Pair launched");

        Ok(Self {
            link,
            clock,
            sensor,
            store,
            phone,
            wrist,
        })
    }

    /// Wait until both nodes resolve the same state
    pub async fn settled(&self) -> anyhow::Result<ResolvedState> {
        timeout(SETTLE_TIMEOUT, async {
            loop {
                let phone = self.phone.resolved().await?;
                let wrist = self.wrist.resolved().await?;
                if phone == wrist {
                    return Ok::<_, anyhow::Error>(phone);
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| anyhow!("nodes did not agree within {SETTLE_TIMEOUT:?}"))?
    }

    /// Stop both nodes
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.phone.shutdown().await?;
        self.wrist.shutdown().await?;
        Ok(())
    }
}

/// Poll `check` until it holds
pub async fn poll_until(what: &str, check: impl Fn() -> bool) -> anyhow::Result<()> {
    timeout(SETTLE_TIMEOUT, async {
        while !check() {
            sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for {what}"))
}

/// Wait until `node` resolves `expected`
pub async fn wait_resolved(node: &CueNode, expected: ResolvedState) -> anyhow::Result<()> {
    timeout(SETTLE_TIMEOUT, async {
        while node.resolved().await? != expected {
            sleep(POLL_INTERVAL).await;
        }
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow!("{} never resolved {expected}", node.role()))?
}

/// Wait until the recorder of `node` is recording, or back to idle
pub async fn wait_recording(node: &CueNode, recording: bool) -> anyhow::Result<()> {
    let mut state = node
        .watch_recorder()
        .ok_or_else(|| anyhow!("{} has no recorder", node.role()))?;
    timeout(
        SETTLE_TIMEOUT,
        state.wait_for(|s| match recording {
            true => s.is_recording(),
            false => *s == RecorderState::Idle,
        }),
    )
    .await
    .map_err(|_| anyhow!("recorder never reached recording={recording}"))?
    .context("recorder stopped")?;
    Ok(())
}
