//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ticket_gate_probing_suspected_total` (counter): rejected hellos by reason
//! - `ticket_gate_connections_total` (counter): connection outcomes
//! - `ticket_gate_key_rotations_total` (counter): completed key rotations
//! - `ticket_gate_relay_bytes_total` (counter): reflected bytes by direction
//! - `ticket_gate_active_connections` (gauge): connections being handled
//!
//! # Design Decisions
//! - Peer addresses go to logs, never to labels
//! - Recording without an installed exporter is a no-op

use std::net::{IpAddr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::hello::{ProbeSink, RejectReason};
use crate::reaction::RelayStats;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_probing_suspected(reason: RejectReason) {
    metrics::counter!("ticket_gate_probing_suspected_total", "reason" => reason.as_str())
        .increment(1);
}

pub fn record_connection(outcome: &'static str) {
    metrics::counter!("ticket_gate_connections_total", "outcome" => outcome).increment(1);
}

pub fn record_key_rotation() {
    metrics::counter!("ticket_gate_key_rotations_total").increment(1);
}

pub fn record_relay_bytes(stats: &RelayStats) {
    metrics::counter!("ticket_gate_relay_bytes_total", "direction" => "client_to_site")
        .increment(stats.client_to_site);
    metrics::counter!("ticket_gate_relay_bytes_total", "direction" => "site_to_client")
        .increment(stats.site_to_client);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("ticket_gate_active_connections").set(count as f64);
}

/// Probe sink that logs the peer and counts the reason.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsProbeSink;

impl ProbeSink for MetricsProbeSink {
    fn suspected_probing(&self, peer_ip: IpAddr, reason: RejectReason) {
        tracing::info!(peer_ip = %peer_ip, reason = %reason, "Suspected probing");
        record_probing_suspected(reason);
    }
}
