//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bounded accept, connection permits)
//!     → connection.rs (connection id, live count)
//!     → shim.rs (mimicry, hello interception, decision)
//!     → tls.rs (real ServerConfig, TLS 1.2 only, key-ring tickets)
//!     → AcceptedConnection handed to the caller
//!     → upstream.rs (plaintext relayed to the local upstream)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Every connection is tracked until its task ends, reactions included
//! - Accept errors back off instead of spinning

pub mod backoff;
pub mod connection;
pub mod listener;
pub mod shim;
pub mod tls;
pub mod upstream;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
pub use shim::{
    AcceptedConnection, ListenerSettings, ProbeResistantListener, StreamListener,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_TICKET_LIFETIME,
};
pub use tls::{build_server_config, load_identity, ServerIdentity, TlsError};
