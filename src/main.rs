//! ticket-gate
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────┐
//!                    │                  TICKET GATE                  │
//!                    │                                               │
//!   TCP connection   │  ┌──────────┐   ┌──────────┐   ┌───────────┐  │
//!   ─────────────────┼─▶│   net    │──▶│  hello   │──▶│  tickets  │  │
//!                    │  │ listener │   │ capture  │   │ key ring  │  │
//!                    │  └──────────┘   └────┬─────┘   └───────────┘  │
//!                    │        valid ticket  │  anything else         │
//!                    │            ┌─────────┴─────────┐              │
//!                    │            ▼                   ▼              │
//!                    │     ┌────────────┐      ┌────────────┐        │
//!   Upstream ◀───────┼─────│ TLS accept │      │  reaction  │────────┼──▶ decoy site
//!                    │     └────────────┘      └────────────┘        │
//!                    └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ticket_gate::config::load_config;
use ticket_gate::lifecycle::{self, spawn_signal_handler, Shutdown, DRAIN_GRACE};
use ticket_gate::net::upstream::forward;
use ticket_gate::observability::init_logging;
use ticket_gate::reaction::{Dial, TcpDialer};

#[derive(Debug, Parser)]
#[command(name = "ticket-gate", version, about = "Probe-resistant TLS front-end")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "ticket-gate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "ticket-gate starting"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let mut gate = lifecycle::start(&config, &shutdown).await?;

    let dialer: Arc<dyn Dial> = Arc::new(TcpDialer::new(config.upstream.connect_timeout()));
    let upstream: Arc<str> = config.upstream.forward_address.as_str().into();
    tracing::info!(
        address = %gate.listener.local_addr(),
        upstream = %upstream,
        "Accepting connections"
    );

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = gate.listener.accept() => match accepted {
                Some(conn) => {
                    let dialer = Arc::clone(&dialer);
                    let upstream = Arc::clone(&upstream);
                    tokio::spawn(async move {
                        forward(conn, dialer, &upstream).await;
                    });
                }
                None => break,
            }
        }
    }

    shutdown.trigger();
    if !gate.listener.drain(DRAIN_GRACE).await {
        tracing::warn!(
            remaining = gate.listener.active_connections(),
            "Drain deadline passed with connections still open"
        );
    }
    let _ = gate.rotation.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
