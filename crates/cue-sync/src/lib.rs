//! # Cue Sync
//!
//! Keeps the session flag converged between the phone and the wrist.
//!
//! ## Components
//!
//! - [`PeerLinkMonitor`]: Tracks activation and reachability of the peer
//! - [`SessionLedger`]: Pure last-writer-wins merge of local and remote values
//! - [`Reconciler`]: Single-writer task that owns the ledger, propagates
//!   local intents, and notifies observers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cue_core::{MockLink, NodeRole};
//! use cue_sync::{PeerLinkMonitor, Reconciler, ReconcilerConfig};
//!
//! let link = MockLink::new();
//! let monitor = Arc::new(PeerLinkMonitor::default());
//! let (notices, _) = tokio::sync::broadcast::channel(16);
//! let (shutdown, shutdown_rx) = tokio::sync::broadcast::channel(1);
//!
//! let (handle, _task) = Reconciler::spawn(
//!     ReconcilerConfig::new(NodeRole::Phone),
//!     link.endpoint(NodeRole::Phone),
//!     monitor,
//!     notices,
//!     shutdown_rx,
//! );
//! handle.propose(true).await?;
//! ```

pub mod error;
pub mod ledger;
pub mod link;
pub mod reconciler;

pub use error::{ReconcilerError, ReconcilerResult};
pub use ledger::{LocalUpdate, RemoteOutcome, SessionLedger};
pub use link::{LinkEvent, PeerLinkMonitor};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle, ReconcilerSnapshot};
