//! Protocol mimicry ahead of the TLS handshake.
//!
//! # Data Flow
//! ```text
//! accepted TcpStream
//!     → PreTlsNegotiator::negotiate (e.g. rdp.rs X.224 exchange)
//!     → Proceed: ClientHello interception on the same socket
//!     → Refused: socket already held open and closed
//! ```
//!
//! # Design Decisions
//! - Negotiation runs before the handshake deadline starts
//! - The RDP variant serves a generated decoy certificate instead of the
//!   configured one

pub mod decoy_cert;
pub mod rdp;

use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;

pub use decoy_cert::DecoyIdentity;
pub use rdp::RdpMimicry;

/// Result of a pre-TLS exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// Continue with TLS on the same socket.
    Proceed,
    /// The peer did not look like a client; the socket has been closed.
    Refused,
}

/// Speaks a cleartext protocol prefix before TLS starts.
pub trait PreTlsNegotiator: Send + Sync {
    fn negotiate<'a>(
        &'a self,
        stream: &'a mut TcpStream,
        peer: SocketAddr,
    ) -> BoxFuture<'a, Negotiation>;
}
