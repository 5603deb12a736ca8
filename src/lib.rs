//! Probe-resistant TLS front-end.
//!
//! Completes TLS handshakes only for clients that present a session ticket
//! sealed with one of the gate's keys; everyone else gets an alert, a closed
//! socket or a decoy site.

pub mod config;
pub mod hello;
pub mod lifecycle;
pub mod mimicry;
pub mod net;
pub mod observability;
pub mod reaction;
pub mod tickets;

pub use config::schema::GateConfig;
pub use hello::{Decision, HelloInspector, ProbeSink, RejectReason};
pub use lifecycle::Shutdown;
pub use net::{AcceptedConnection, ListenerSettings, ProbeResistantListener, StreamListener};
pub use reaction::{AlertCode, HandshakeReaction};
pub use tickets::{KeyRing, KeySource};
