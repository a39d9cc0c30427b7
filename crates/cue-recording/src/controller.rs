//! Recording controller
//!
//! Drives the sensor from resolved session state. The controller runs in its
//! own task and receives targets through a `watch` channel, so at most one
//! target is pending and the newest one wins. A slow sensor therefore never
//! blocks the reconciler that feeds it.
//!
//! ```text
//!   Idle --true--> Starting --begin ok--> Recording --false--> Stopping --> Idle
//!                     |                                            |
//!                     +--begin failed--> Idle (+ self-correction)  +--> RecordedSession
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, instrument, warn};

use cue_core::{
    Clock, IntentOrigin, IntentSink, Notice, RecordedSession, Resolution, SessionObserver,
};

use crate::sensor::SensorSession;
use crate::upload::{SubmitOutcome, UploadPipeline};

/// Recording lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Starting,
    Recording { started_at: DateTime<Utc> },
    Stopping,
}

impl RecorderState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Recording { .. } => write!(f, "recording"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Events emitted by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    StateChanged(RecorderState),
    /// A recording finished and was handed to the upload pipeline
    SessionCompleted(RecordedSession),
    /// The sensor refused to start
    StartFailed { reason: String },
}

/// Handle to a running controller
///
/// Registered with the reconciler as a [`SessionObserver`].
#[derive(Clone)]
pub struct ControllerHandle {
    target: Arc<watch::Sender<Option<bool>>>,
    state: watch::Receiver<RecorderState>,
    events: broadcast::Sender<RecorderEvent>,
}

impl ControllerHandle {
    /// Request a recording target directly
    pub fn set_target(&self, active: bool) {
        self.target.send_replace(Some(active));
    }

    pub fn state(&self) -> RecorderState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RecorderState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }
}

impl SessionObserver for ControllerHandle {
    fn on_resolved(&self, resolution: &Resolution) {
        self.set_target(resolution.active());
    }
}

/// The recording controller task
pub struct RecordingController<C: Clock> {
    sensor: Arc<dyn SensorSession>,
    clock: C,
    intents: Arc<dyn IntentSink>,
    uploads: UploadPipeline,
    notices: broadcast::Sender<Notice>,
    event_buffer: usize,
}

impl<C: Clock + 'static> RecordingController<C> {
    pub fn new(
        sensor: Arc<dyn SensorSession>,
        clock: C,
        intents: Arc<dyn IntentSink>,
        uploads: UploadPipeline,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            sensor,
            clock,
            intents,
            uploads,
            notices,
            event_buffer: 64,
        }
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    /// Spawn the controller as a background task
    pub fn spawn(self, shutdown_rx: broadcast::Receiver<()>) -> (ControllerHandle, JoinHandle<()>) {
        let (target, target_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(RecorderState::Idle);
        let (events, _) = broadcast::channel(self.event_buffer);

        let handle = ControllerHandle {
            target: Arc::new(target),
            state: state_rx,
            events: events.clone(),
        };

        let task = ControllerTask {
            controller: self,
            target_rx,
            state: state_tx,
            events,
            shutdown_rx,
        };
        let join = tokio::spawn(task.run().in_current_span());
        (handle, join)
    }
}

struct ControllerTask<C: Clock> {
    controller: RecordingController<C>,
    target_rx: watch::Receiver<Option<bool>>,
    state: watch::Sender<RecorderState>,
    events: broadcast::Sender<RecorderEvent>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<C: Clock> ControllerTask<C> {
    async fn run(mut self) {
        info!("Recording controller started");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Recording controller shutting down");
                    break;
                }
                changed = self.target_rx.changed() => {
                    if changed.is_err() {
                        debug!("Controller handles dropped");
                        break;
                    }
                    self.drive().await;
                }
            }
        }

        if self.current().is_recording() {
            warn!("Shutting down with a recording in progress");
        }
    }

    /// Move towards the newest target until it is reached
    async fn drive(&mut self) {
        loop {
            let Some(target) = *self.target_rx.borrow_and_update() else {
                return;
            };

            match (target, self.current()) {
                (true, RecorderState::Idle) => {
                    if !self.start().await {
                        // Wait for the corrected target rather than retrying
                        return;
                    }
                }
                (false, RecorderState::Recording { started_at }) => self.stop(started_at).await,
                (target, state) => {
                    debug!(target, state = %state, "Target already satisfied");
                    return;
                }
            }
        }
    }

    fn current(&self) -> RecorderState {
        *self.state.borrow()
    }

    fn transition(&self, next: RecorderState) {
        debug!(from = %self.current(), to = %next, "Recorder transition");
        self.state.send_replace(next);
        let _ = self.events.send(RecorderEvent::StateChanged(next));
    }

    #[instrument(skip(self))]
    async fn start(&mut self) -> bool {
        self.transition(RecorderState::Starting);

        match self.controller.sensor.begin().await {
            Ok(started_at) => {
                info!(started_at = %started_at, "Recording started");
                self.transition(RecorderState::Recording { started_at });
                true
            }
            Err(e) => {
                warn!(error = %e, "Sensor failed to start, switching session off");
                self.transition(RecorderState::Idle);

                let reason = e.to_string();
                let _ = self.events.send(RecorderEvent::StartFailed {
                    reason: reason.clone(),
                });
                let _ = self
                    .controller
                    .notices
                    .send(Notice::SensorUnavailable { reason });

                if !self
                    .controller
                    .intents
                    .submit_intent(false, IntentOrigin::SelfCorrection)
                    .await
                {
                    warn!("Could not submit self-correction: reconciler closed");
                }
                false
            }
        }
    }

    #[instrument(skip(self))]
    async fn stop(&mut self, started_at: DateTime<Utc>) {
        self.transition(RecorderState::Stopping);

        if let Err(e) = self.controller.sensor.end().await {
            warn!(error = %e, "Sensor failed to stop cleanly");
        }

        let session = RecordedSession::between(started_at, self.controller.clock.now_utc());
        info!(
            session = %session.id,
            duration_secs = session.duration_secs(),
            "Recording finished"
        );

        if self.controller.uploads.submit(session.clone()) == SubmitOutcome::Duplicate {
            warn!(session = %session.id, "Finished session was already submitted");
        }
        let _ = self.events.send(RecorderEvent::SessionCompleted(session));
        self.transition(RecorderState::Idle);
    }
}
