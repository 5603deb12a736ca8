//! The handshake-time decision: serve the real certificate or react.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::hello::record::ParsedClientHello;
use crate::reaction::HandshakeReaction;
use crate::tickets::KeyRing;

/// Why a ClientHello was not accepted as an authenticated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    MalformedClientHello,
    TicketExtensionNotOffered,
    NoSessionTicket,
    InvalidSessionTicket,
    HandshakeTimeout,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MalformedClientHello => "malformed ClientHello",
            RejectReason::TicketExtensionNotOffered => "ticket extension not offered",
            RejectReason::NoSessionTicket => "no session ticket",
            RejectReason::InvalidSessionTicket => "invalid session ticket",
            RejectReason::HandshakeTimeout => "handshake timeout",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives suspected-probing events.
pub trait ProbeSink: Send + Sync {
    fn suspected_probing(&self, peer_ip: IpAddr, reason: RejectReason);
}

/// Outcome of inspecting one ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Serve the real certificate.
    Continue,
    /// Hand the raw connection to the reaction engine.
    Reject {
        reason: RejectReason,
        reaction: HandshakeReaction,
    },
}

/// Decides, per ClientHello, whether the peer holds a valid session ticket.
pub struct HelloInspector {
    key_ring: Arc<KeyRing>,
    sink: Arc<dyn ProbeSink>,
    reaction: HandshakeReaction,
    loopback_bypass: bool,
}

impl HelloInspector {
    pub fn new(
        key_ring: Arc<KeyRing>,
        sink: Arc<dyn ProbeSink>,
        reaction: HandshakeReaction,
        loopback_bypass: bool,
    ) -> Self {
        Self {
            key_ring,
            sink,
            reaction,
            loopback_bypass,
        }
    }

    /// Inspect the bytes captured from `peer` up to the handshake callback.
    pub fn on_hello(&self, peer: SocketAddr, raw: &[u8]) -> Decision {
        if self.loopback_bypass && is_loopback(peer.ip()) {
            tracing::trace!(peer_addr = %peer, "Loopback peer, skipping ticket check");
            return Decision::Continue;
        }

        match self.verify(raw) {
            Ok(()) => Decision::Continue,
            Err(reason) => self.reject(peer, reason),
        }
    }

    /// Record a rejection for `peer` and pair it with the configured reaction.
    pub fn reject(&self, peer: SocketAddr, reason: RejectReason) -> Decision {
        tracing::debug!(peer_addr = %peer, reason = %reason, "Rejecting ClientHello");
        self.sink.suspected_probing(peer.ip(), reason);
        Decision::Reject {
            reason,
            reaction: self.reaction.clone(),
        }
    }

    fn verify(&self, raw: &[u8]) -> Result<(), RejectReason> {
        let hello = ParsedClientHello::parse(raw).map_err(|e| {
            tracing::trace!(error = %e, "ClientHello parse failed");
            RejectReason::MalformedClientHello
        })?;
        tracing::trace!(
            hello_len = hello.record_bytes().len(),
            trailing = hello.raw().len() - hello.record_bytes().len(),
            server_name = hello.server_name.as_deref().unwrap_or(""),
            "ClientHello parsed"
        );

        if !hello.ticket_supported {
            return Err(RejectReason::TicketExtensionNotOffered);
        }
        if hello.session_ticket.is_empty() {
            return Err(RejectReason::NoSessionTicket);
        }

        // Snapshot taken once; a concurrent rotation does not affect this check.
        let keys = self.key_ring.current_keys();
        match keys.open(&hello.session_ticket) {
            Some(state) if !state.is_empty() => Ok(()),
            _ => Err(RejectReason::InvalidSessionTicket),
        }
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(v6.is_loopback(), |v4| v4.is_loopback()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hello::record::tests::client_hello;
    use crate::reaction::AlertCode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(IpAddr, RejectReason)>>);

    impl ProbeSink for Recorder {
        fn suspected_probing(&self, peer_ip: IpAddr, reason: RejectReason) {
            self.0.lock().unwrap().push((peer_ip, reason));
        }
    }

    fn inspector(ring: Arc<KeyRing>, bypass: bool) -> (HelloInspector, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let inspector = HelloInspector::new(
            ring,
            recorder.clone(),
            HandshakeReaction::Alert(AlertCode::HandshakeFailure),
            bypass,
        );
        (inspector, recorder)
    }

    fn remote() -> SocketAddr {
        "203.0.113.7:51000".parse().unwrap()
    }

    fn reason(decision: Decision) -> RejectReason {
        match decision {
            Decision::Reject { reason, .. } => reason,
            Decision::Continue => panic!("expected rejection"),
        }
    }

    #[test]
    fn valid_ticket_continues() {
        let ring = Arc::new(KeyRing::generated());
        let ticket = ring.current_keys().seal(b"session").unwrap();
        let (inspector, recorder) = inspector(ring, false);

        let raw = client_hello("proxy.test", Some(&ticket));
        assert_eq!(inspector.on_hello(remote(), &raw), Decision::Continue);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn each_failure_has_its_reason() {
        let ring = Arc::new(KeyRing::generated());
        let foreign = KeyRing::generated().current_keys().seal(b"session").unwrap();
        let (inspector, recorder) = inspector(ring, false);

        let cases = [
            (b"\x16\x03\x01\x00\x01\x01".to_vec(), RejectReason::MalformedClientHello),
            (client_hello("a.test", None), RejectReason::TicketExtensionNotOffered),
            (client_hello("a.test", Some(b"")), RejectReason::NoSessionTicket),
            (client_hello("a.test", Some(&foreign)), RejectReason::InvalidSessionTicket),
        ];
        for (raw, expected) in cases {
            assert_eq!(reason(inspector.on_hello(remote(), &raw)), expected);
        }

        let recorded = recorder.0.lock().unwrap();
        assert_eq!(recorded.len(), 4);
        assert!(recorded.iter().all(|(ip, _)| *ip == remote().ip()));
        assert_eq!(recorded[1].1.as_str(), "ticket extension not offered");
    }

    #[test]
    fn missing_extension_rejects_whatever_else_is_sent() {
        let ring = Arc::new(KeyRing::generated());
        let (inspector, _) = inspector(ring, false);
        for name in ["a.test", "b.test", "with-a-much-longer-name.example"] {
            let decision = inspector.on_hello(remote(), &client_hello(name, None));
            assert_eq!(reason(decision), RejectReason::TicketExtensionNotOffered);
        }
    }

    #[test]
    fn empty_sealed_state_is_invalid() {
        let ring = Arc::new(KeyRing::generated());
        let ticket = ring.current_keys().seal(b"").unwrap();
        let (inspector, _) = inspector(ring, false);
        let decision = inspector.on_hello(remote(), &client_hello("a.test", Some(&ticket)));
        assert_eq!(reason(decision), RejectReason::InvalidSessionTicket);
    }

    #[test]
    fn loopback_bypass() {
        let ring = Arc::new(KeyRing::generated());
        let (open, recorder) = inspector(Arc::clone(&ring), true);
        for peer in ["127.0.0.1:4000", "[::1]:4000", "[::ffff:127.0.0.1]:4000"] {
            let peer: SocketAddr = peer.parse().unwrap();
            assert_eq!(open.on_hello(peer, b"not even tls"), Decision::Continue);
        }
        assert!(recorder.0.lock().unwrap().is_empty());

        let (strict, _) = inspector(ring, false);
        let local: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert!(matches!(
            strict.on_hello(local, b"not even tls"),
            Decision::Reject { .. }
        ));
    }

    #[test]
    fn decision_uses_snapshot_at_check_time() {
        let ring = Arc::new(KeyRing::generated());
        let ticket = ring.current_keys().seal(b"state").unwrap();
        let (inspector, _) = inspector(Arc::clone(&ring), false);

        // A single-key ring never rotates, so the ticket stays valid.
        assert!(!ring.rotate());
        let raw = client_hello("a.test", Some(&ticket));
        assert_eq!(inspector.on_hello(remote(), &raw), Decision::Continue);
    }
}
