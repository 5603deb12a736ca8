//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GateConfig (validated, immutable)
//!     → lifecycle/startup.rs turns it into listener settings and a key ring
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    GateConfig, ListenerConfig, MimicryConfig, MimicryProtocol, ObservabilityConfig,
    ReactionConfig, SessionTicketConfig, TlsConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
