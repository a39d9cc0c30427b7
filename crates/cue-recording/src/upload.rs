//! Session upload pipeline
//!
//! Finished sessions are handed to [`UploadPipeline::submit`], which returns
//! at once. Each session then gets its own task that calls the
//! [`SessionStore`] with exponential backoff until it succeeds or the retry
//! budget runs out. Session ids are remembered so a session is never stored
//! twice by the same pipeline.
//!
//! Upload failures never touch recording state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::{Instrument, debug, info, instrument, warn};

use cue_core::{Notice, PersistenceError, RecordedSession, SessionId};

/// Persistence collaborator
///
/// Not idempotent: calling it twice for one session stores two records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn record_session(
        &self,
        user_id: &str,
        session: &RecordedSession,
    ) -> Result<(), PersistenceError>;
}

/// Retry schedule for failed uploads
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Upper bound for any delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(64),
        }
    }
}

impl RetryPolicy {
    /// Millisecond-scale schedule for tests and simulation
    pub fn fast() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(40),
        }
    }

    /// Delay before retry number `retry` (0-based): `initial * multiplier^retry`, capped
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(32) as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Identity the sessions are stored under
    pub user_id: Option<String>,
    pub retry: RetryPolicy,
    /// Capacity of the upload event channel
    pub event_buffer: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            retry: RetryPolicy::default(),
            event_buffer: 64,
        }
    }
}

/// Result of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A background upload was started
    Queued,
    /// The session id was already submitted
    Duplicate,
}

/// Lifecycle of one submitted session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Stored,
    Abandoned,
}

/// Progress events of the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Stored {
        session_id: SessionId,
        attempts: u32,
    },
    RetryScheduled {
        session_id: SessionId,
        attempt: u32,
        delay: Duration,
        error: PersistenceError,
    },
    Abandoned {
        session_id: SessionId,
        attempts: u32,
        error: PersistenceError,
    },
}

struct PipelineInner {
    store: Arc<dyn SessionStore>,
    config: UploadConfig,
    uploads: DashMap<SessionId, UploadStatus>,
    events: broadcast::Sender<UploadEvent>,
    notices: broadcast::Sender<Notice>,
    shutdown: broadcast::Sender<()>,
}

/// Retrying, de-duplicating uploader of recorded sessions
#[derive(Clone)]
pub struct UploadPipeline {
    inner: Arc<PipelineInner>,
}

impl UploadPipeline {
    /// Create a pipeline; upload tasks stop when `shutdown` fires
    pub fn new(
        config: UploadConfig,
        store: Arc<dyn SessionStore>,
        notices: broadcast::Sender<Notice>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            inner: Arc::new(PipelineInner {
                store,
                config,
                uploads: DashMap::new(),
                events,
                notices,
                shutdown,
            }),
        }
    }

    /// Queue a session for upload
    pub fn submit(&self, session: RecordedSession) -> SubmitOutcome {
        match self.inner.uploads.entry(session.id) {
            Entry::Occupied(_) => {
                debug!(session = %session.id, "Session already submitted");
                return SubmitOutcome::Duplicate;
            }
            Entry::Vacant(slot) => {
                slot.insert(UploadStatus::Pending);
            }
        }

        info!(
            session = %session.id,
            duration_secs = session.duration_secs(),
            "Session queued for upload"
        );
        let inner = Arc::clone(&self.inner);
        let shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(upload(inner, session, shutdown_rx).in_current_span());
        SubmitOutcome::Queued
    }

    pub fn status(&self, id: &SessionId) -> Option<UploadStatus> {
        self.inner.uploads.get(id).map(|entry| *entry.value())
    }

    /// Number of sessions still being uploaded
    pub fn pending_count(&self) -> usize {
        self.inner
            .uploads
            .iter()
            .filter(|entry| *entry.value() == UploadStatus::Pending)
            .count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.config.retry
    }
}

#[instrument(skip_all, fields(session = %session.id.short()))]
async fn upload(
    inner: Arc<PipelineInner>,
    session: RecordedSession,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let policy = &inner.config.retry;
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match inner.config.user_id.as_deref() {
            Some(user_id) => inner.store.record_session(user_id, &session).await,
            None => Err(PersistenceError::MissingUser),
        };

        let error = match result {
            Ok(()) => {
                info!(attempts = attempt, "Session stored");
                inner.uploads.insert(session.id, UploadStatus::Stored);
                let _ = inner.events.send(UploadEvent::Stored {
                    session_id: session.id,
                    attempts: attempt,
                });
                return;
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %error, "Giving up on session upload");
            inner.uploads.insert(session.id, UploadStatus::Abandoned);
            let _ = inner.events.send(UploadEvent::Abandoned {
                session_id: session.id,
                attempts: attempt,
                error: error.clone(),
            });
            let _ = inner.notices.send(Notice::UploadAbandoned {
                session_id: session.id,
                attempts: attempt,
                error: error.to_string(),
            });
            return;
        }

        let delay = policy.backoff_duration(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Upload failed, retrying");
        let _ = inner.events.send(UploadEvent::RetryScheduled {
            session_id: session.id,
            attempt,
            delay,
            error,
        });

        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Upload cancelled by shutdown");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// In-memory [`SessionStore`] for tests and simulation
#[derive(Default)]
pub struct MemorySessionStore {
    stored: Mutex<Vec<(String, RecordedSession)>>,
    failures: Mutex<VecDeque<PersistenceError>>,
    attempts: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with `error`
    pub fn fail_next(&self, count: usize, error: PersistenceError) {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.extend(std::iter::repeat_n(error, count));
    }

    /// Sessions stored so far, in order
    pub fn stored(&self) -> Vec<RecordedSession> {
        self.stored
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(_, session)| session.clone())
            .collect()
    }

    /// User ids the sessions were stored under, in order
    pub fn users(&self) -> Vec<String> {
        self.stored
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(user, _)| user.clone())
            .collect()
    }

    /// Number of `record_session` calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn record_session(
        &self,
        user_id: &str,
        session: &RecordedSession,
    ) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        if let Some(error) = injected {
            return Err(error);
        }

        self.stored
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((user_id.to_string(), session.clone()));
        Ok(())
    }
}
