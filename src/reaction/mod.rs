//! Reactions to rejected ClientHellos.
//!
//! # Responsibilities
//! - Make a rejected connection look like an ordinary, unremarkable server
//! - Replay the captured ClientHello to a decoy site when reflecting
//!
//! # Data Flow
//! ```text
//! Decision::Reject { reaction }
//!     → Delayed layers peeled (sleep each)
//!     → Alert: one fatal alert record, close
//!     → Close: close, nothing written
//!     → ReflectToSite: dial → replay hello → relay.rs until either side ends
//! ```
//!
//! # Design Decisions
//! - Every reaction is terminal; the connection never reaches `accept()`
//! - A failed dial closes the client without writing anything

pub mod alert;
pub mod dialer;
pub mod relay;

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub use alert::AlertCode;
pub use dialer::{AsyncStream, BoxedStream, Dial, TcpDialer};
pub use relay::{relay, RelayStats, RELAY_LINGER};

use crate::hello::CapturedHello;
use crate::observability::metrics;

/// What a rejected connection experiences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReaction {
    /// Monitor only: the handshake continues as if accepted.
    None,
    Alert(AlertCode),
    Close,
    Delayed(Duration, Box<HandshakeReaction>),
    /// Relay the connection to `host:port`.
    ReflectToSite(String),
}

impl HandshakeReaction {
    /// Whether this reaction lets the handshake proceed.
    pub fn is_monitor_only(&self) -> bool {
        matches!(self, HandshakeReaction::None)
    }
}

impl fmt::Display for HandshakeReaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeReaction::None => f.write_str("none"),
            HandshakeReaction::Alert(code) => write!(f, "alert({code})"),
            HandshakeReaction::Close => f.write_str("close"),
            HandshakeReaction::Delayed(delay, inner) => {
                write!(f, "delayed({}ms, {inner})", delay.as_millis())
            }
            HandshakeReaction::ReflectToSite(dest) => write!(f, "reflect({dest})"),
        }
    }
}

/// How a reaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    Alerted(AlertCode),
    Closed,
    Reflected { destination: String, stats: RelayStats },
}

#[derive(Debug, Error)]
pub enum ReactionError {
    #[error("failed to reach reflection site {destination}: {source}")]
    Dial {
        destination: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error during reaction: {0}")]
    Io(#[from] io::Error),
}

/// Runs reactions against detached client sockets.
#[derive(Clone)]
pub struct ReactionEngine {
    dialer: Arc<dyn Dial>,
}

impl ReactionEngine {
    pub fn new(dialer: Arc<dyn Dial>) -> Self {
        Self { dialer }
    }

    /// Execute `reaction` on `client`, consuming the captured hello.
    ///
    /// The client is always shut down by the time this returns, even when
    /// it returns an error.
    pub async fn execute<S>(
        &self,
        reaction: &HandshakeReaction,
        mut client: S,
        hello: CapturedHello,
    ) -> Result<ReactionOutcome, ReactionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut current = reaction;
        loop {
            match current {
                HandshakeReaction::Delayed(delay, inner) => {
                    tokio::time::sleep(*delay).await;
                    current = inner;
                }
                HandshakeReaction::Alert(code) => {
                    drop(hello);
                    let written = client.write_all(&code.record()).await;
                    let _ = client.shutdown().await;
                    written?;
                    return Ok(ReactionOutcome::Alerted(*code));
                }
                // Monitor-only after a delay has nothing left to continue into.
                HandshakeReaction::Close | HandshakeReaction::None => {
                    drop(hello);
                    let _ = client.shutdown().await;
                    return Ok(ReactionOutcome::Closed);
                }
                HandshakeReaction::ReflectToSite(destination) => {
                    return self.reflect(destination, client, hello).await;
                }
            }
        }
    }

    async fn reflect<S>(
        &self,
        destination: &str,
        mut client: S,
        hello: CapturedHello,
    ) -> Result<ReactionOutcome, ReactionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let replay = hello.into_replay();
        let mut site = match self.dialer.dial(destination).await {
            Ok(site) => site,
            Err(source) => {
                let _ = client.shutdown().await;
                return Err(ReactionError::Dial {
                    destination: destination.to_string(),
                    source,
                });
            }
        };

        if let Err(e) = site.write_all(&replay).await {
            let _ = client.shutdown().await;
            return Err(e.into());
        }
        tracing::debug!(
            destination = %destination,
            replayed = replay.len(),
            "Reflecting connection to site"
        );

        let mut stats = relay(client, site).await;
        stats.client_to_site += replay.len() as u64;
        metrics::record_relay_bytes(&stats);

        Ok(ReactionOutcome::Reflected {
            destination: destination.to_string(),
            stats,
        })
    }
}

impl fmt::Debug for ReactionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionEngine").finish_non_exhaustive()
    }
}
