//! Hand authenticated plaintext streams to the local upstream.

use std::sync::Arc;

use crate::net::shim::AcceptedConnection;
use crate::reaction::{relay, Dial, RelayStats};

/// Forward `conn` to `upstream` until either side closes.
///
/// Returns `None` when the upstream could not be reached; the client is
/// dropped in that case.
pub async fn forward(
    conn: AcceptedConnection,
    dialer: Arc<dyn Dial>,
    upstream: &str,
) -> Option<RelayStats> {
    let connection_id = conn.id();
    let site = match dialer.dial(upstream).await {
        Ok(site) => site,
        Err(e) => {
            tracing::warn!(
                connection_id = %connection_id,
                upstream = %upstream,
                error = %e,
                "Upstream unreachable"
            );
            return None;
        }
    };

    let stats = relay(conn, site).await;
    tracing::debug!(
        connection_id = %connection_id,
        sent = stats.client_to_site,
        received = stats.site_to_client,
        "Upstream stream closed"
    );
    Some(stats)
}
