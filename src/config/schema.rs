//! Configuration schema definitions.
//!
//! Every section has defaults, so a minimal file only names what differs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reaction::{AlertCode, HandshakeReaction};

/// Root configuration for the gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    pub listener: ListenerConfig,
    pub tls: TlsConfig,
    pub session_tickets: SessionTicketConfig,
    pub reaction: ReactionConfig,
    pub mimicry: MimicryConfig,
    pub upstream: UpstreamConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:443").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Deadline from first byte to finished handshake.
    pub handshake_timeout_secs: u64,

    /// Skip the ticket check for loopback peers, so local tooling can
    /// obtain tickets from the live ring. On unless turned off.
    pub loopback_bypass: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:443".to_string(),
            max_connections: 10_000,
            handshake_timeout_secs: 10,
            loopback_bypass: true,
        }
    }
}

impl ListenerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Real certificate served to ticket holders. Unused with RDP mimicry.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate chain (PEM).
    pub cert_path: Option<String>,

    /// Path to private key (PEM).
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionTicketConfig {
    /// Base64 of N × 32 key bytes, newest first.
    pub keys_base64: Option<String>,

    /// Flat binary key file; created with one key when missing.
    pub key_file: Option<String>,

    pub rotation_interval_secs: u64,

    /// Cap on keys kept by a file-backed ring. Unbounded when unset.
    pub max_keys: Option<usize>,

    /// Lifetime hint attached to issued tickets.
    pub ticket_lifetime_secs: u64,
}

impl Default for SessionTicketConfig {
    fn default() -> Self {
        Self {
            keys_base64: None,
            key_file: None,
            rotation_interval_secs: 24 * 60 * 60,
            max_keys: None,
            ticket_lifetime_secs: 24 * 60 * 60,
        }
    }
}

impl SessionTicketConfig {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }

    pub fn ticket_lifetime(&self) -> Duration {
        Duration::from_secs(self.ticket_lifetime_secs)
    }
}

/// What a rejected client experiences.
///
/// ```toml
/// [reaction]
/// type = "delayed"
/// delay_ms = 1500
///
/// [reaction.then]
/// type = "reflect"
/// destination = "www.example.com:443"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactionConfig {
    None,
    Alert {
        #[serde(default = "default_alert")]
        alert: AlertCode,
    },
    Close,
    Delayed {
        delay_ms: u64,
        then: Box<ReactionConfig>,
    },
    Reflect {
        destination: String,
    },
}

fn default_alert() -> AlertCode {
    AlertCode::HandshakeFailure
}

impl Default for ReactionConfig {
    fn default() -> Self {
        ReactionConfig::Alert {
            alert: default_alert(),
        }
    }
}

impl From<&ReactionConfig> for HandshakeReaction {
    fn from(config: &ReactionConfig) -> Self {
        match config {
            ReactionConfig::None => HandshakeReaction::None,
            ReactionConfig::Alert { alert } => HandshakeReaction::Alert(*alert),
            ReactionConfig::Close => HandshakeReaction::Close,
            ReactionConfig::Delayed { delay_ms, then } => HandshakeReaction::Delayed(
                Duration::from_millis(*delay_ms),
                Box::new(HandshakeReaction::from(then.as_ref())),
            ),
            ReactionConfig::Reflect { destination } => {
                HandshakeReaction::ReflectToSite(destination.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MimicryProtocol {
    Rdp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MimicryConfig {
    /// Cleartext protocol spoken before TLS. Plain TLS when unset.
    pub protocol: Option<MimicryProtocol>,

    /// Time allowed for the client's protocol prefix.
    pub prefix_timeout_secs: u64,

    /// How long unrecognized clients are held before closing.
    pub hold_open_secs: u64,
}

impl Default for MimicryConfig {
    fn default() -> Self {
        Self {
            protocol: None,
            prefix_timeout_secs: 5,
            hold_open_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Where authenticated plaintext streams are forwarded.
    pub forward_address: String,

    /// Connect timeout for the upstream and for reflection sites.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            forward_address: "127.0.0.1:8080".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
