//! Shared utilities for the listener integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use ticket_gate::hello::{ProbeSink, RejectReason};
use ticket_gate::lifecycle::Shutdown;
use ticket_gate::net::{ListenerSettings, ProbeResistantListener, ServerIdentity};
use ticket_gate::reaction::HandshakeReaction;
use ticket_gate::tickets::KeyRing;

pub const SERVER_NAME: &str = "gate.test";

/// Probe sink that remembers every event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(IpAddr, RejectReason)>>,
}

impl RecordingSink {
    pub fn reasons(&self) -> Vec<RejectReason> {
        self.events.lock().unwrap().iter().map(|(_, r)| *r).collect()
    }

    pub fn peers(&self) -> Vec<IpAddr> {
        self.events.lock().unwrap().iter().map(|(ip, _)| *ip).collect()
    }
}

impl ProbeSink for RecordingSink {
    fn suspected_probing(&self, peer_ip: IpAddr, reason: RejectReason) {
        self.events.lock().unwrap().push((peer_ip, reason));
    }
}

/// Self-signed identity for `gate.test`.
pub fn identity() -> ServerIdentity {
    let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.to_string()]).unwrap();
    ServerIdentity {
        cert_chain: vec![cert.cert.der().clone()],
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der())),
    }
}

/// Loopback settings; loopback bypass is off so local tests exercise the check.
pub fn settings(reaction: HandshakeReaction) -> ListenerSettings {
    let mut settings = ListenerSettings::new("127.0.0.1:0", identity());
    settings.reaction = reaction;
    settings.loopback_bypass = false;
    settings.max_connections = 16;
    settings
}

pub struct TestGate {
    pub listener: ProbeResistantListener,
    pub sink: Arc<RecordingSink>,
    pub shutdown: Shutdown,
    pub addr: SocketAddr,
}

pub async fn start_gate(settings: ListenerSettings, key_ring: Arc<KeyRing>) -> TestGate {
    let sink = Arc::new(RecordingSink::default());
    let shutdown = Shutdown::new();
    let listener = ProbeResistantListener::bind(
        settings,
        key_ring,
        sink.clone(),
        shutdown.subscribe(),
    )
    .await
    .unwrap();
    let addr = listener.local_addr();
    TestGate {
        listener,
        sink,
        shutdown,
        addr,
    }
}

/// Minimal TLS 1.2 ClientHello record, optionally carrying a session ticket.
pub fn client_hello(server_name: &str, ticket: Option<&[u8]>) -> Vec<u8> {
    let mut extensions = Vec::new();

    let name = server_name.as_bytes();
    let mut sni = Vec::new();
    sni.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    sni.push(0);
    sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
    sni.extend_from_slice(name);
    push_extension(&mut extensions, 0x0000, &sni);

    // supported_groups and ec_point_formats keep ECDHE suites negotiable
    push_extension(&mut extensions, 0x000a, &[0x00, 0x02, 0x00, 0x17]);
    push_extension(&mut extensions, 0x000b, &[0x01, 0x00]);
    push_extension(&mut extensions, 0x000d, &[0x00, 0x04, 0x04, 0x03, 0x08, 0x04]);
    if let Some(ticket) = ticket {
        push_extension(&mut extensions, 0x0023, ticket);
    }

    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0x42; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x04, 0xc0, 0x2b, 0xc0, 0x2f]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

fn push_extension(out: &mut Vec<u8>, extension_type: u16, data: &[u8]) {
    out.extend_from_slice(&extension_type.to_be_bytes());
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

/// Send `bytes` and collect everything the gate writes until it closes.
pub async fn send_and_collect(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    let mut received = Vec::new();
    let _ = stream.read_to_end(&mut received).await;
    received
}

/// Decoy site that reads `expect` bytes, answers `reply`, and hands back
/// what it read.
pub async fn start_decoy(expect: usize, reply: &'static [u8]) -> (SocketAddr, JoinHandle<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = vec![0u8; expect];
        socket.read_exact(&mut received).await.unwrap();
        socket.write_all(reply).await.unwrap();
        let _ = socket.shutdown().await;
        received
    });
    (addr, handle)
}

/// TLS 1.2 client that trusts any certificate and keeps session tickets.
pub fn client_config() -> Arc<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12])
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify))
        .with_no_client_auth();
    Arc::new(config)
}

pub async fn tls_connect(
    config: &Arc<ClientConfig>,
    stream: TcpStream,
) -> std::io::Result<TlsStream<TcpStream>> {
    let name = ServerName::try_from(SERVER_NAME).unwrap();
    TlsConnector::from(Arc::clone(config))
        .connect(name, stream)
        .await
}

#[derive(Debug)]
pub struct NoVerify;

impl ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
