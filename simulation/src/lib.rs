//! # Cue Simulation
//!
//! Runs a phone and a wrist node against each other over [`MockLink`],
//! with a mock sensor and an in-memory session store standing in for the
//! platform.
//!
//! - **Harness** (`harness.rs`): launching pairs and waiting on their state
//! - **Scenarios** (`scenarios.rs`): scripted runs A to D
//! - **Chaos** (`chaos.rs`): seeded random toggling under a flapping link
//!
//! ## Example
//!
//! ```rust,ignore
//! use cue_simulation::{Scenario, scenarios};
//!
//! let report = scenarios::run(Scenario::LongSession).await?;
//! println!("{report}");
//! ```
//!
//! [`MockLink`]: cue_core::MockLink

pub mod chaos;
pub mod harness;
pub mod scenarios;

pub use chaos::{ChaosConfig, ChaosReport};
pub use harness::Pair;
pub use scenarios::{Scenario, ScenarioReport};
