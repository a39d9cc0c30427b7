//! Convergence tests for two reconcilers paired over a mock link

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;

use cue_core::{
    ChangeOrigin, MockLink, MockLinkConfig, MockTransport, NodeRole, PeerTransport, Resolution,
    ResolvedState, StateStamp, TransportEvent, WireMessage, WireReply,
};
use cue_sync::{PeerLinkMonitor, Reconciler, ReconcilerConfig, ReconcilerHandle};

struct TestNode {
    handle: ReconcilerHandle,
    resolutions: broadcast::Receiver<Resolution>,
    _shutdown: broadcast::Sender<()>,
}

/// Route transport callbacks into the reconciler
async fn pump(transport: Arc<MockTransport>, monitor: Arc<PeerLinkMonitor>, handle: ReconcilerHandle) {
    while let Ok(event) = transport.next_event().await {
        match event {
            TransportEvent::Activated { reachable, durable } => {
                let event = monitor.activation_completed(reachable, durable.as_deref());
                let _ = handle.link_event(event).await;
            }
            TransportEvent::ReachabilityChanged { reachable } => {
                if let Some(event) = monitor.reachability_changed(reachable) {
                    let _ = handle.link_event(event).await;
                }
            }
            TransportEvent::Live { payload, reply } => {
                let answer = match WireMessage::from_bytes(&payload) {
                    Ok(WireMessage::Announce(stamp)) => WireReply::Current(
                        handle
                            .deliver_remote(stamp, ChangeOrigin::Live)
                            .await
                            .ok()
                            .flatten(),
                    ),
                    Ok(WireMessage::SyncRequest) => {
                        WireReply::Current(handle.sync_requested().await.ok().flatten())
                    }
                    Ok(other) => WireReply::Rejected(format!("unsupported: {other:?}")),
                    Err(e) => WireReply::Rejected(e.to_string()),
                };
                reply.send(answer.to_bytes().unwrap());
            }
            TransportEvent::Durable { payload } => {
                let stamp = StateStamp::from_bytes(&payload).unwrap();
                let _ = handle.deliver_remote(stamp, ChangeOrigin::Durable).await;
            }
        }
    }
}

fn start_node(link: &MockLink, role: NodeRole) -> TestNode {
    let transport = link.endpoint(role);
    let monitor = Arc::new(PeerLinkMonitor::default());
    let (notices, _) = broadcast::channel(16);
    let (shutdown, shutdown_rx) = broadcast::channel(1);

    let (handle, _) = Reconciler::spawn(
        ReconcilerConfig::new(role),
        transport.clone(),
        Arc::clone(&monitor),
        notices,
        shutdown_rx,
    );
    let resolutions = handle.subscribe();
    tokio::spawn(pump(transport, monitor, handle.clone()));

    TestNode {
        handle,
        resolutions,
        _shutdown: shutdown,
    }
}

async fn next_resolution(node: &mut TestNode) -> Resolution {
    tokio::time::timeout(Duration::from_secs(2), node.resolutions.recv())
        .await
        .expect("no resolution within timeout")
        .expect("resolution channel closed")
}

/// Wait until both nodes hold the same known stamp
async fn converged(a: &TestNode, b: &TestNode) -> StateStamp {
    for _ in 0..200 {
        let left = a.handle.snapshot().await.unwrap().stamp;
        let right = b.handle.snapshot().await.unwrap().stamp;
        if let (Some(left), Some(right)) = (left, right) {
            if left == right {
                return left;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("nodes did not converge");
}

fn unreachable_link() -> MockLink {
    MockLink::with_config(MockLinkConfig {
        initially_reachable: false,
        ..MockLinkConfig::default()
    })
}

#[tokio::test]
async fn test_reachable_start_reaches_wrist() {
    let link = MockLink::new();
    let phone = start_node(&link, NodeRole::Phone);
    let mut wrist = start_node(&link, NodeRole::Wrist);
    link.activate(NodeRole::Phone);
    link.activate(NodeRole::Wrist);

    phone.handle.propose(true).await.unwrap();

    let resolution = next_resolution(&mut wrist).await;
    assert!(!resolution.origin.is_local());
    assert_eq!(resolution.previous, ResolvedState::Unknown);
    assert!(resolution.active());
    assert_eq!(converged(&phone, &wrist).await.writer, NodeRole::Phone);
}

#[tokio::test]
async fn test_unreachable_start_delivered_on_reconnect() {
    let link = unreachable_link();
    let phone = start_node(&link, NodeRole::Phone);
    let mut wrist = start_node(&link, NodeRole::Wrist);
    link.activate(NodeRole::Phone);
    link.activate(NodeRole::Wrist);

    phone.handle.propose(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(wrist.handle.resolved().await.unwrap(), ResolvedState::Unknown);

    link.set_reachable(true);

    let resolution = next_resolution(&mut wrist).await;
    assert!(resolution.active());
    assert!(converged(&phone, &wrist).await.active);
}

#[tokio::test]
async fn test_cold_start_adopts_durable_value() {
    let link = MockLink::new();
    let phone = start_node(&link, NodeRole::Phone);
    link.activate(NodeRole::Phone);
    phone.handle.propose(true).await.unwrap();

    // Wrist launches after the phone already wrote the value
    let mut wrist = start_node(&link, NodeRole::Wrist);
    link.activate(NodeRole::Wrist);

    let resolution = next_resolution(&mut wrist).await;
    assert_eq!(resolution.origin, ChangeOrigin::Activation);
    assert!(resolution.active());
}

#[tokio::test]
async fn test_late_stale_message_is_rejected() {
    let link = MockLink::new();
    let mut phone = start_node(&link, NodeRole::Phone);
    let mut wrist = start_node(&link, NodeRole::Wrist);
    link.activate(NodeRole::Phone);
    link.activate(NodeRole::Wrist);

    let first = phone.handle.propose(true).await.unwrap();
    assert!(next_resolution(&mut wrist).await.active());
    assert!(next_resolution(&mut phone).await.active());

    // Wrist stops, then the phone's first message arrives late
    let stop = wrist.handle.propose(false).await.unwrap();
    assert!(stop.supersedes(&first));
    let held = wrist
        .handle
        .deliver_remote(first, ChangeOrigin::Live)
        .await
        .unwrap();
    assert_eq!(held, Some(stop));

    let resolution = next_resolution(&mut phone).await;
    assert!(!resolution.active());
    assert_eq!(converged(&phone, &wrist).await, stop);
    assert_eq!(wrist.handle.resolved().await.unwrap(), ResolvedState::Inactive);
}

#[tokio::test]
async fn test_concurrent_phone_start_loses_to_wrist_stop() {
    let link = unreachable_link();
    let phone = start_node(&link, NodeRole::Phone);
    let wrist = start_node(&link, NodeRole::Wrist);
    link.activate(NodeRole::Phone);
    link.activate(NodeRole::Wrist);

    let from_phone = phone.handle.propose(true).await.unwrap();
    let from_wrist = wrist.handle.propose(false).await.unwrap();
    assert_eq!(from_phone.revision, from_wrist.revision);

    link.set_reachable(true);

    assert_eq!(converged(&phone, &wrist).await, from_wrist);
}

#[tokio::test]
async fn test_concurrent_wrist_start_loses_to_phone_stop() {
    let link = unreachable_link();
    let phone = start_node(&link, NodeRole::Phone);
    let wrist = start_node(&link, NodeRole::Wrist);
    link.activate(NodeRole::Phone);
    link.activate(NodeRole::Wrist);

    let from_wrist = wrist.handle.propose(true).await.unwrap();
    let from_phone = phone.handle.propose(false).await.unwrap();
    assert_eq!(from_phone.revision, from_wrist.revision);

    link.set_reachable(true);

    let winner = converged(&phone, &wrist).await;
    assert_eq!(winner, from_phone);
    assert_eq!(phone.handle.resolved().await.unwrap(), ResolvedState::Inactive);
    assert_eq!(wrist.handle.resolved().await.unwrap(), ResolvedState::Inactive);
}

#[tokio::test]
async fn test_toggle_while_peer_absent_is_not_lost() {
    let link = MockLink::new();
    let phone = start_node(&link, NodeRole::Phone);
    link.activate(NodeRole::Phone);

    phone.handle.toggle().await.unwrap();
    phone.handle.toggle().await.unwrap();
    let last = phone.handle.toggle().await.unwrap();

    let wrist = start_node(&link, NodeRole::Wrist);
    link.activate(NodeRole::Wrist);

    assert_eq!(converged(&phone, &wrist).await, last);
}

#[tokio::test]
async fn test_random_schedules_converge() {
    for seed in [7u64, 21, 1337] {
        let mut rng = StdRng::seed_from_u64(seed);
        let link = MockLink::new();
        let phone = start_node(&link, NodeRole::Phone);
        let wrist = start_node(&link, NodeRole::Wrist);
        link.activate(NodeRole::Phone);
        link.activate(NodeRole::Wrist);

        let mut issued = vec![phone.handle.propose(true).await.unwrap()];
        for _ in 0..40 {
            match rng.random_range(0..4) {
                0 => link.set_reachable(rng.random_bool(0.5)),
                1 => {
                    let stamp = phone.handle.propose(rng.random_bool(0.5)).await.unwrap();
                    issued.push(stamp);
                }
                2 => {
                    let stamp = wrist.handle.propose(rng.random_bool(0.5)).await.unwrap();
                    issued.push(stamp);
                }
                _ => tokio::time::sleep(Duration::from_millis(rng.random_range(0..5))).await,
            }
        }
        link.set_reachable(true);

        let expected = issued.iter().copied().max_by(|a, b| a.order(b));
        let settled = converged(&phone, &wrist).await;
        assert_eq!(Some(settled), expected, "seed {seed}");
    }
}
