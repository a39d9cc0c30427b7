//! # Cue Node
//!
//! One side of a phone/wrist pairing, wired together.
//!
//! [`CueNode`] ties together:
//! - the [`PeerLinkMonitor`] and [`Reconciler`] from `cue-sync`
//! - a [`RecordingController`] when the node has a sensor
//! - an [`UploadPipeline`] storing finished sessions (directly on the phone,
//!   through [`PeerRelayStore`] on the wrist)
//! - the [`EventPump`] feeding transport callbacks into all of them
//!
//! Every task a node spawns runs inside that node's [`NodeContext`] span.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cue_core::{MockLink, NodeRole};
//! use cue_node::{Collaborators, CueNode, NodeConfig};
//!
//! let link = MockLink::new();
//! let phone = CueNode::start(
//!     NodeConfig::phone().with_user_id("user-1"),
//!     link.endpoint(NodeRole::Phone),
//!     Collaborators::new().with_store(store),
//! ).await?;
//!
//! phone.propose(true).await?;
//! let mut notices = phone.notices();
//! ```

mod config;
mod error;
pub mod pump;
pub mod relay;

pub use config::{ConfigWarning, NodeConfig};
pub use error::{NodeError, NodeResult};
pub use pump::EventPump;
pub use relay::{PeerRelayStore, RELAY_USER_ID};

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

use cue_core::{
    Clock, IntentSink, NodeRole, Notice, PeerLinkStatus, PeerTransport, Resolution, ResolvedState,
    StateStamp, SystemClock,
};
use cue_logging::NodeContext;
use cue_recording::{
    ControllerHandle, RecorderEvent, RecorderState, RecordingController, SensorSession,
    SessionStore, UploadEvent, UploadPipeline,
};
use cue_sync::{PeerLinkMonitor, Reconciler, ReconcilerHandle, ReconcilerSnapshot};

/// Platform collaborators of a node
pub struct Collaborators<C: Clock = SystemClock> {
    /// Sensor capture; only the wrist has one
    pub sensor: Option<Arc<dyn SensorSession>>,
    /// Session persistence; defaults to relaying to the phone on the wrist
    pub store: Option<Arc<dyn SessionStore>>,
    pub clock: C,
}

impl Collaborators<SystemClock> {
    pub fn new() -> Self {
        Self {
            sensor: None,
            store: None,
            clock: SystemClock,
        }
    }
}

impl Default for Collaborators<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Collaborators<C> {
    pub fn with_sensor(mut self, sensor: Arc<dyn SensorSession>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a different clock for session timing
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Collaborators<C2> {
        Collaborators {
            sensor: self.sensor,
            store: self.store,
            clock,
        }
    }
}

/// A running phone or wrist node
pub struct CueNode {
    context: NodeContext,
    config: NodeConfig,
    monitor: Arc<PeerLinkMonitor>,
    reconciler: ReconcilerHandle,
    controller: Option<ControllerHandle>,
    uploads: UploadPipeline,
    notices: broadcast::Sender<Notice>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl CueNode {
    /// Build and start a node on `transport`
    ///
    /// The transport should not be activated yet: activation is observed
    /// through the event pump spawned here.
    pub async fn start<C: Clock + 'static>(
        config: NodeConfig,
        transport: Arc<dyn PeerTransport>,
        collaborators: Collaborators<C>,
    ) -> NodeResult<Self> {
        let context = NodeContext::new(config.role);
        let span = context.span();

        for warning in config.validate() {
            warn!(node = %context, warning = %warning, "Node configuration warning");
        }

        let store: Arc<dyn SessionStore> = match (collaborators.store, config.role) {
            (Some(store), _) => store,
            (None, NodeRole::Wrist) => Arc::new(PeerRelayStore::new(Arc::clone(&transport))),
            (None, NodeRole::Phone) => {
                return Err(NodeError::Config(
                    "phone node requires a session store".into(),
                ));
            }
        };

        let capacity = config.event_channel_capacity.max(1);
        let (notices, _) = broadcast::channel(capacity);
        let (shutdown_tx, _) = broadcast::channel(1);
        let monitor = Arc::new(PeerLinkMonitor::new(capacity));
        let mut tasks = Vec::new();

        let (reconciler, reconciler_task) = span.in_scope(|| {
            Reconciler::spawn(
                config.reconciler(),
                Arc::clone(&transport),
                Arc::clone(&monitor),
                notices.clone(),
                shutdown_tx.subscribe(),
            )
        });
        tasks.push(reconciler_task);

        let uploads = UploadPipeline::new(
            config.upload.clone(),
            store,
            notices.clone(),
            shutdown_tx.clone(),
        );

        let controller = match collaborators.sensor {
            Some(sensor) => {
                let intents: Arc<dyn IntentSink> = Arc::new(reconciler.clone());
                let (handle, task) = span.in_scope(|| {
                    RecordingController::new(
                        sensor,
                        collaborators.clock,
                        intents,
                        uploads.clone(),
                        notices.clone(),
                    )
                    .with_event_buffer(capacity)
                    .spawn(shutdown_tx.subscribe())
                });
                reconciler.register_observer(Arc::new(handle.clone())).await?;
                tasks.push(task);
                Some(handle)
            }
            None => None,
        };

        let pump = EventPump::new(
            transport,
            Arc::clone(&monitor),
            reconciler.clone(),
            uploads.clone(),
            notices.clone(),
            shutdown_tx.subscribe(),
        );
        tasks.push(tokio::spawn(pump.run().instrument(span.clone())));

        span.in_scope(|| info!(recording = controller.is_some(), "Node started"));

        Ok(Self {
            context,
            config,
            monitor,
            reconciler,
            controller,
            uploads,
            notices,
            shutdown_tx,
            tasks,
        })
    }

    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Submit a user intent
    pub async fn propose(&self, active: bool) -> NodeResult<StateStamp> {
        Ok(self.reconciler.propose(active).await?)
    }

    /// Flip the session flag, as the user's single control does
    pub async fn toggle(&self) -> NodeResult<StateStamp> {
        Ok(self.reconciler.toggle().await?)
    }

    pub async fn resolved(&self) -> NodeResult<ResolvedState> {
        Ok(self.reconciler.resolved().await?)
    }

    pub async fn snapshot(&self) -> NodeResult<ReconcilerSnapshot> {
        Ok(self.reconciler.snapshot().await?)
    }

    pub fn link_status(&self) -> PeerLinkStatus {
        self.monitor.status()
    }

    pub fn watch_link(&self) -> watch::Receiver<PeerLinkStatus> {
        self.monitor.watch()
    }

    pub fn reconciler(&self) -> &ReconcilerHandle {
        &self.reconciler
    }

    pub fn uploads(&self) -> &UploadPipeline {
        &self.uploads
    }

    /// Current recorder state, if this node records
    pub fn recorder_state(&self) -> Option<RecorderState> {
        self.controller.as_ref().map(|c| c.state())
    }

    pub fn watch_recorder(&self) -> Option<watch::Receiver<RecorderState>> {
        self.controller.as_ref().map(|c| c.watch_state())
    }

    /// Subscribe to resolved state changes
    pub fn resolutions(&self) -> broadcast::Receiver<Resolution> {
        self.reconciler.subscribe()
    }

    /// Subscribe to user-visible notices
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn upload_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.uploads.subscribe()
    }

    pub fn recorder_events(&self) -> Option<broadcast::Receiver<RecorderEvent>> {
        self.controller.as_ref().map(|c| c.subscribe())
    }

    /// Stop every task of this node and wait for them to finish
    pub async fn shutdown(self) -> NodeResult<()> {
        info!(node = %self.context, "Shutting down node");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            task.await?;
        }
        Ok(())
    }
}
