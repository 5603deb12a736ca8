//! RDP front door ahead of the ticket check.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use common::{client_config, client_hello, start_gate, tls_connect, TestGate};
use ticket_gate::hello::RejectReason;
use ticket_gate::mimicry::rdp::CONNECTION_CONFIRM;
use ticket_gate::mimicry::{DecoyIdentity, RdpMimicry};
use ticket_gate::net::ListenerSettings;
use ticket_gate::reaction::{AlertCode, HandshakeReaction};
use ticket_gate::tickets::KeyRing;

const HOLD_OPEN: Duration = Duration::from_millis(300);

fn connection_request(cookie: &str) -> Vec<u8> {
    let mut x224 = vec![0xe0, 0x00, 0x00, 0x00, 0x00, 0x00];
    x224.extend_from_slice(format!("Cookie: mstshash={cookie}\r\n").as_bytes());
    x224.extend_from_slice(&[0x01, 0x00, 0x08, 0x00, 0x01, 0x00, 0x00, 0x00]);

    let total = 5 + x224.len();
    let mut frame = vec![0x03, 0x00];
    frame.extend_from_slice(&(total as u16).to_be_bytes());
    frame.push(x224.len() as u8);
    frame.extend_from_slice(&x224);
    frame
}

async fn rdp_gate(loopback_bypass: bool) -> (TestGate, DecoyIdentity) {
    let decoy = DecoyIdentity::generate().unwrap();
    let mut settings = ListenerSettings::new("127.0.0.1:0", decoy.identity.clone());
    settings.loopback_bypass = loopback_bypass;
    settings.reaction = HandshakeReaction::Alert(AlertCode::HandshakeFailure);
    settings.negotiator = Some(Arc::new(RdpMimicry::new(Duration::from_secs(2), HOLD_OPEN)));
    let gate = start_gate(settings, Arc::new(KeyRing::generated())).await;
    (gate, decoy)
}

async fn negotiate(stream: &mut TcpStream) {
    stream.write_all(&connection_request("admin")).await.unwrap();
    let mut confirm = [0u8; CONNECTION_CONFIRM.len()];
    stream.read_exact(&mut confirm).await.unwrap();
    assert_eq!(confirm, CONNECTION_CONFIRM);
}

#[tokio::test]
async fn rdp_negotiation_then_tls_with_decoy_certificate() {
    let (mut gate, decoy) = rdp_gate(true).await;
    assert!(decoy.hostname.starts_with("WIN-") || decoy.hostname.starts_with("DESKTOP-"));

    let mut stream = TcpStream::connect(gate.addr).await.unwrap();
    negotiate(&mut stream).await;

    let config = client_config();
    let client = tls_connect(&config, stream).await.unwrap();
    let presented = client.get_ref().1.peer_certificates().unwrap();
    assert_eq!(presented[0], decoy.identity.cert_chain[0]);

    let accepted = gate.listener.accept().await.unwrap();
    assert!(!accepted.resumed());
    assert!(gate.sink.reasons().is_empty());
}

#[tokio::test]
async fn rdp_negotiation_still_requires_a_ticket() {
    let (gate, _decoy) = rdp_gate(false).await;

    let mut stream = TcpStream::connect(gate.addr).await.unwrap();
    negotiate(&mut stream).await;
    stream.write_all(&client_hello("gate.test", None)).await.unwrap();

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, AlertCode::HandshakeFailure.record());
    assert_eq!(gate.sink.reasons(), vec![RejectReason::TicketExtensionNotOffered]);
}

#[tokio::test]
async fn garbage_prefix_is_held_open_then_closed() {
    let (gate, _decoy) = rdp_gate(false).await;

    let started = Instant::now();
    let mut stream = TcpStream::connect(gate.addr).await.unwrap();
    stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();

    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received).await;

    assert!(received.is_empty());
    assert!(started.elapsed() >= HOLD_OPEN);
    assert!(gate.sink.reasons().is_empty());
}
