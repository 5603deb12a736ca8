//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → metrics → key ring + rotation → bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second SIGTERM/SIGINT → Exit immediately
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Shutdown has a drain deadline (`DRAIN_GRACE`)

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, DRAIN_GRACE};
pub use signals::spawn_signal_handler;
pub use startup::{build_key_ring, listener_settings, start, RunningGate, StartupError};
