//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated `GateConfig` into a key ring and listener settings
//! - Start background tasks (metrics exporter, key rotation)
//! - Bind the listener last, once everything it depends on exists
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{GateConfig, MimicryProtocol, SessionTicketConfig};
use crate::lifecycle::shutdown::Shutdown;
use crate::mimicry::{DecoyIdentity, PreTlsNegotiator, RdpMimicry};
use crate::net::{load_identity, ListenerError, ListenerSettings, ProbeResistantListener, TlsError};
use crate::observability::{init_metrics, MetricsProbeSink};
use crate::reaction::{HandshakeReaction, TcpDialer};
use crate::tickets::{spawn_rotation, KeyRing, KeyRingError, KeySource};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("session ticket keys: {0}")]
    KeyRing(#[from] KeyRingError),
    #[error("certificate: {0}")]
    Tls(#[from] TlsError),
    #[error("decoy certificate: {0}")]
    Decoy(#[from] rcgen::Error),
    #[error("listener: {0}")]
    Listener(#[from] ListenerError),
    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("configuration: {0}")]
    Config(String),
}

/// A running gate: the listener plus the tasks it depends on.
#[derive(Debug)]
pub struct RunningGate {
    pub listener: ProbeResistantListener,
    pub key_ring: Arc<KeyRing>,
    pub rotation: JoinHandle<()>,
}

/// Build the key ring described by `config`.
///
/// Without a configured source the ring holds one fresh in-memory key.
pub fn build_key_ring(config: &SessionTicketConfig) -> Result<KeyRing, KeyRingError> {
    match (&config.keys_base64, &config.key_file) {
        (Some(encoded), _) => KeyRing::initialize(KeySource::InMemory(encoded.clone())),
        (None, Some(path)) => KeyRing::initialize(KeySource::File {
            path: PathBuf::from(path),
            max_keys: config.max_keys,
        }),
        (None, None) => {
            tracing::warn!("No session ticket keys configured, tickets will not survive restart");
            Ok(KeyRing::generated())
        }
    }
}

/// Listener settings for `config`, loading or generating the certificate.
pub fn listener_settings(config: &GateConfig) -> Result<ListenerSettings, StartupError> {
    let (identity, negotiator) = match config.mimicry.protocol {
        Some(MimicryProtocol::Rdp) => {
            let decoy = DecoyIdentity::generate()?;
            let rdp: Arc<dyn PreTlsNegotiator> = Arc::new(RdpMimicry::new(
                Duration::from_secs(config.mimicry.prefix_timeout_secs),
                Duration::from_secs(config.mimicry.hold_open_secs),
            ));
            (decoy.identity, Some(rdp))
        }
        None => {
            let (Some(cert), Some(key)) = (&config.tls.cert_path, &config.tls.key_path) else {
                return Err(StartupError::Config(
                    "tls.cert_path and tls.key_path are required".into(),
                ));
            };
            (load_identity(Path::new(cert), Path::new(key))?, None)
        }
    };

    let mut settings = ListenerSettings::new(config.listener.bind_address.clone(), identity);
    settings.max_connections = config.listener.max_connections;
    settings.handshake_timeout = config.listener.handshake_timeout();
    settings.loopback_bypass = config.listener.loopback_bypass;
    settings.reaction = HandshakeReaction::from(&config.reaction);
    settings.ticket_lifetime = config.session_tickets.ticket_lifetime();
    settings.negotiator = negotiator;
    settings.dialer = Arc::new(TcpDialer::new(config.upstream.connect_timeout()));
    Ok(settings)
}

/// Start metrics, key rotation and the listener, in that order.
pub async fn start(config: &GateConfig, shutdown: &Shutdown) -> Result<RunningGate, StartupError> {
    if config.observability.metrics_enabled {
        let addr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|e| StartupError::Config(format!("metrics_address: {e}")))?;
        init_metrics(addr)?;
    }

    let key_ring = Arc::new(build_key_ring(&config.session_tickets)?);
    let rotation = spawn_rotation(
        Arc::clone(&key_ring),
        config.session_tickets.rotation_interval(),
        shutdown.subscribe(),
    );

    let settings = listener_settings(config)?;
    let listener = ProbeResistantListener::bind(
        settings,
        Arc::clone(&key_ring),
        Arc::new(MetricsProbeSink),
        shutdown.subscribe(),
    )
    .await?;

    Ok(RunningGate {
        listener,
        key_ring,
        rotation,
    })
}
