//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events: peer_addr, connection_id, reason)
//!     → metrics.rs (counters and the active-connection gauge)
//!
//! Consumers:
//!     → stdout log stream
//!     → Prometheus scrape endpoint (opt-in)
//! ```
//!
//! # Design Decisions
//! - Metrics endpoint is off by default and binds loopback when enabled
//! - Probing events are both logged and counted through `MetricsProbeSink`

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, MetricsProbeSink};
