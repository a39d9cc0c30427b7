//! # Cue Recording
//!
//! Turns resolved session state into sensor captures and stored sessions.
//!
//! - [`RecordingController`]: Starts and stops the sensor as the shared flag
//!   changes, emitting one [`RecordedSession`](cue_core::RecordedSession) per
//!   completed recording
//! - [`UploadPipeline`]: Hands finished sessions to a [`SessionStore`] with
//!   bounded exponential backoff
//!
//! Collaborators are traits ([`SensorSession`], [`SessionStore`]) with
//! in-memory implementations for tests and simulation.

pub mod controller;
pub mod sensor;
pub mod upload;

pub use controller::{ControllerHandle, RecorderEvent, RecorderState, RecordingController};
pub use sensor::{MockSensor, SensorSession};
pub use upload::{
    MemorySessionStore, RetryPolicy, SessionStore, SubmitOutcome, UploadConfig, UploadEvent,
    UploadPipeline, UploadStatus,
};
