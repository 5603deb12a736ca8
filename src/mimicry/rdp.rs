//! RDP front door: X.224 negotiation before TLS.
//!
//! A real RDP server answers an X.224 Connection Request that asks for
//! `PROTOCOL_SSL` with a Connection Confirm and then starts TLS on the same
//! socket. Anything else gets a silent socket that is held open for a while
//! and then closed.

use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::mimicry::{Negotiation, PreTlsNegotiator};

const TPKT_HEADER_LEN: usize = 4;
const MAX_FRAME_LEN: usize = 512;
/// Routing token, when present, starts right after the TPKT and X.224 headers.
const ROUTING_TOKEN_OFFSET: usize = 11;

/// X.224 CR with an RDP_NEG_REQ, from the CR code onwards, minus the last
/// `requestedProtocols` bytes.
const NEG_REQ_PREFIX: [u8; 10] = [0xe0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x08, 0x00];
const PROTOCOL_SSL: u8 = 0x01;
const PROTOCOL_SSL_HYBRID: u8 = 0x03;

/// X.224 Connection Confirm selecting `PROTOCOL_SSL`.
pub const CONNECTION_CONFIRM: [u8; 19] = [
    0x03, 0x00, 0x00, 0x13, 0x0e, 0xd0, 0x00, 0x00, 0x12, 0x34, 0x00, 0x02, 0x1f, 0x08, 0x00,
    0x01, 0x00, 0x00, 0x00,
];

/// Pre-TLS negotiator speaking just enough RDP to reach the TLS upgrade.
#[derive(Debug, Clone)]
pub struct RdpMimicry {
    prefix_timeout: Duration,
    hold_open: Duration,
}

impl RdpMimicry {
    pub fn new(prefix_timeout: Duration, hold_open: Duration) -> Self {
        Self {
            prefix_timeout,
            hold_open,
        }
    }

    async fn run(&self, stream: &mut TcpStream, peer: SocketAddr) -> Negotiation {
        let frame = match timeout(self.prefix_timeout, read_tpkt_frame(stream)).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::debug!(peer_addr = %peer, "Invalid TPKT header");
                return self.refuse(stream).await;
            }
            Ok(Err(e)) => {
                tracing::debug!(peer_addr = %peer, error = %e, "Failed reading RDP prefix");
                return self.refuse(stream).await;
            }
            Err(_) => {
                tracing::debug!(peer_addr = %peer, "Timed out waiting for RDP prefix");
                return self.refuse(stream).await;
            }
        };

        if !is_ssl_connection_request(&strip_routing_token(&frame)) {
            tracing::debug!(peer_addr = %peer, len = frame.len(), "Unrecognized X.224 request");
            return self.refuse(stream).await;
        }

        if let Err(e) = stream.write_all(&CONNECTION_CONFIRM).await {
            tracing::debug!(peer_addr = %peer, error = %e, "Failed writing X.224 confirm");
            return Negotiation::Refused;
        }
        tracing::trace!(peer_addr = %peer, "RDP negotiation complete, expecting TLS");
        Negotiation::Proceed
    }

    /// Drain input until `hold_open` elapses or the peer goes away, then close.
    async fn refuse(&self, stream: &mut TcpStream) -> Negotiation {
        let mut scratch = [0u8; 1024];
        let drain = async {
            loop {
                match stream.read(&mut scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        let _ = timeout(self.hold_open, drain).await;
        let _ = stream.shutdown().await;
        Negotiation::Refused
    }
}

impl PreTlsNegotiator for RdpMimicry {
    fn negotiate<'a>(
        &'a self,
        stream: &'a mut TcpStream,
        peer: SocketAddr,
    ) -> BoxFuture<'a, Negotiation> {
        Box::pin(self.run(stream, peer))
    }
}

/// Read one TPKT frame, header included. `None` for a bad header.
async fn read_tpkt_frame(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; TPKT_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    if header[0] != 0x03 || header[1] != 0x00 {
        return Ok(None);
    }
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    if !(TPKT_HEADER_LEN + 1..=MAX_FRAME_LEN).contains(&len) {
        return Ok(None);
    }

    let mut frame = vec![0u8; len];
    frame[..TPKT_HEADER_LEN].copy_from_slice(&header);
    stream.read_exact(&mut frame[TPKT_HEADER_LEN..]).await?;
    Ok(Some(frame))
}

/// Remove a `Cookie:` or `tsv://` routing field through its CRLF.
///
/// Returns the frame unchanged when there is no such field or it is not
/// CRLF-terminated.
pub fn strip_routing_token(frame: &[u8]) -> Cow<'_, [u8]> {
    let Some(rest) = frame.get(ROUTING_TOKEN_OFFSET..) else {
        return Cow::Borrowed(frame);
    };
    if !rest.starts_with(b"Cookie:") && !rest.starts_with(b"tsv://") {
        return Cow::Borrowed(frame);
    }
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            let mut stripped = Vec::with_capacity(frame.len());
            stripped.extend_from_slice(&frame[..ROUTING_TOKEN_OFFSET]);
            stripped.extend_from_slice(&rest[end + 2..]);
            Cow::Owned(stripped)
        }
        None => Cow::Borrowed(frame),
    }
}

/// X.224 Connection Request asking for `PROTOCOL_SSL` (optionally with HYBRID).
pub fn is_ssl_connection_request(frame: &[u8]) -> bool {
    if frame.len() != TPKT_HEADER_LEN + 1 + NEG_REQ_PREFIX.len() + 4 || frame[..2] != [0x03, 0x00] {
        return false;
    }
    let body = &frame[TPKT_HEADER_LEN + 1..];
    let (prefix, protocols) = body.split_at(NEG_REQ_PREFIX.len());
    prefix == NEG_REQ_PREFIX
        && matches!(protocols[0], PROTOCOL_SSL | PROTOCOL_SSL_HYBRID)
        && protocols[1..] == [0, 0, 0]
}
