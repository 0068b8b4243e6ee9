//! vayu-link - Dataref synchronization client for networked flight simulators
//!
//! Connects external control surfaces (hardware panels, scripted flight-deck
//! automation) to a running simulator by reading and writing named state
//! variables ("datarefs") and invoking named commands over the network.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   beacons    ┌─────────────────────────────────┐
//! │  Simulator   │─────────────▶│ discovery worker                │
//! │              │              │   publishes endpoint            │
//! │              │◀─────────────│ subscribe worker                │
//! │              │  RREF/DREF/  │   re-sends after every change   │
//! │              │  CMND/PREL   │                                 │
//! │              │─────────────▶│ receive worker                  │
//! └──────────────┘   updates    │   decode → cache → ChangeSet    │
//!                               └───────────────┬─────────────────┘
//!                                               │ observers / channels
//!                                               ▼
//!                                  panels, automation, UIs
//! ```
//!
//! The UDP client ([`DatarefClient`]) tolerates the simulator starting late,
//! restarting, or disappearing: discovery retries forever, subscriptions are
//! renegotiated after every reconnect, and callers read last-known values in
//! the meantime. The session client ([`SessionClient`]) is the alternate
//! transport for automation needing name → id directory lookup plus a
//! reconnecting value stream.

pub mod client;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use client::{ClientOptions, DatarefClient};
pub use config::AppConfig;
pub use crate::core::types::{ChangeSet, DatarefKey, DatarefValue, Subscription, ValueTransform};
pub use error::{Error, Result};
pub use notify::ChangeObserver;
pub use protocol::StartPosition;
pub use session::{NameKind, SessionClient, SessionOptions};

/// Current version of vayu-link
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
