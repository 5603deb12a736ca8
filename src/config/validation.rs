//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that the key source and certificate source are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: GateConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GateConfig, ReactionConfig};
use crate::tickets::KeySnapshot;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", listener.bind_address),
        ));
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if listener.handshake_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.handshake_timeout_secs", "must be > 0"));
    }

    let tls = &config.tls;
    match (&tls.cert_path, &tls.key_path) {
        (Some(_), Some(_)) => {}
        (None, None) if config.mimicry.protocol.is_some() => {}
        (None, None) => errors.push(ValidationError::new(
            "tls",
            "cert_path and key_path are required without mimicry",
        )),
        _ => errors.push(ValidationError::new(
            "tls",
            "cert_path and key_path must be set together",
        )),
    }

    let tickets = &config.session_tickets;
    match (&tickets.keys_base64, &tickets.key_file) {
        (Some(_), Some(_)) => errors.push(ValidationError::new(
            "session_tickets",
            "keys_base64 and key_file are mutually exclusive",
        )),
        (Some(encoded), None) => {
            if let Err(e) = KeySnapshot::from_base64(encoded) {
                errors.push(ValidationError::new("session_tickets.keys_base64", e.to_string()));
            }
        }
        (None, Some(path)) if path.is_empty() => {
            errors.push(ValidationError::new("session_tickets.key_file", "must not be empty"));
        }
        _ => {}
    }
    if tickets.rotation_interval_secs == 0 {
        errors.push(ValidationError::new(
            "session_tickets.rotation_interval_secs",
            "must be > 0",
        ));
    }
    if tickets.max_keys == Some(0) {
        errors.push(ValidationError::new("session_tickets.max_keys", "must be > 0"));
    }
    if tickets.max_keys.is_some() && tickets.key_file.is_none() {
        errors.push(ValidationError::new(
            "session_tickets.max_keys",
            "only applies to a key_file",
        ));
    }

    validate_reaction(&config.reaction, "reaction", &mut errors);

    let mimicry = &config.mimicry;
    if mimicry.protocol.is_some() {
        if mimicry.prefix_timeout_secs == 0 {
            errors.push(ValidationError::new("mimicry.prefix_timeout_secs", "must be > 0"));
        }
        if mimicry.hold_open_secs == 0 {
            errors.push(ValidationError::new("mimicry.hold_open_secs", "must be > 0"));
        }
    }

    if !is_host_port(&config.upstream.forward_address) {
        errors.push(ValidationError::new(
            "upstream.forward_address",
            "must be host:port",
        ));
    }
    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.connect_timeout_secs", "must be > 0"));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", observability.log_level),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_reaction(reaction: &ReactionConfig, field: &str, errors: &mut Vec<ValidationError>) {
    match reaction {
        ReactionConfig::Delayed { then, .. } => {
            if matches!(then.as_ref(), ReactionConfig::None) {
                errors.push(ValidationError::new(
                    field,
                    "a delayed reaction must end in alert, close or reflect",
                ));
            }
            validate_reaction(then, &format!("{field}.then"), errors);
        }
        ReactionConfig::Reflect { destination } if !is_host_port(destination) => {
            errors.push(ValidationError::new(
                format!("{field}.destination"),
                "must be host:port",
            ));
        }
        _ => {}
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
