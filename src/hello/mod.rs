//! ClientHello capture and inspection.
//!
//! # Responsibilities
//! - Tee the bytes a client sends while the TLS library reads its ClientHello
//! - Parse the hello and pull out the session-ticket extension
//! - Decide whether the connection continues to the real certificate
//!
//! # Design Decisions
//! - The TLS library never writes to the socket before a decision exists;
//!   anything it emits (alerts included) is swallowed until passthrough
//! - Capture buffers come from a shared bounded pool and are released as
//!   soon as the decision is made

pub mod conn;
pub mod inspect;
pub mod pool;
pub mod record;

pub use conn::{
    CapturedHello, ConnectionState, Detached, HelloInterceptingConnection, InterceptHandle,
    MAX_HELLO_CAPTURE,
};
pub use inspect::{Decision, HelloInspector, ProbeSink, RejectReason};
pub use pool::{HelloBufferPool, PooledBuffer};
pub use record::{ParseError, ParsedClientHello};
