//! # Cue Core
//!
//! Core types, wire messages, transport abstraction, and errors shared by
//! the phone and wrist nodes of a Cue pairing.
//!
//! The two nodes replicate one boolean ("is a monitoring session active?")
//! over a proximity transport with a live request/reply channel and a
//! durable last-value-wins register. Only the wrist can record; only the
//! phone reliably reaches the network.
//!
//! ## Key Traits
//!
//! - [`PeerTransport`]: Live and durable delivery between the two nodes
//! - [`SessionObserver`]: Receives resolved state transitions
//! - [`IntentSink`]: Accepts local intents
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`StateStamp`]: A session state value with its [`Revision`] and writer
//! - [`SessionActiveState`]: The canonical value a node holds
//! - [`RecordedSession`]: A finished session awaiting storage
//! - [`WireMessage`]: Messages exchanged over the live channel
//! - [`MockLink`]: In-memory transport pairing for tests

pub mod error;
pub mod event;
pub mod identity;
pub mod message;
pub mod mock_transport;
pub mod session;
pub mod state;
pub mod traits;
pub mod transport;

// Re-export main types
pub use error::*;
pub use event::*;
pub use identity::*;
pub use message::*;
pub use mock_transport::*;
pub use session::*;
pub use state::*;
pub use traits::*;
pub use transport::*;
