//! Probe-resistant TLS listener.
//!
//! # Data Flow
//! ```text
//! accept loop (one per listener, never waits on a handshake)
//!     → spawn per connection:
//!         → optional pre-TLS negotiation (mimicry)
//!         → HelloInterceptingConnection + LazyConfigAcceptor   ┐
//!         → HelloInspector::on_hello                          │ handshake
//!         → Continue: passthrough, finish handshake           │ deadline
//!                     → AcceptedConnection → accept() channel  ┘
//!         → Reject:   detach raw socket → ReactionEngine
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::server::Acceptor;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_rustls::{server::TlsStream, LazyConfigAcceptor, StartHandshake};

use crate::hello::{
    Decision, Detached, HelloBufferPool, HelloInspector, HelloInterceptingConnection,
    InterceptHandle, ProbeSink, RejectReason,
};
use crate::mimicry::{Negotiation, PreTlsNegotiator};
use crate::net::backoff::AcceptBackoff;
use crate::net::connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::tls::{build_server_config, ServerIdentity};
use crate::observability::metrics;
use crate::reaction::{Dial, HandshakeReaction, ReactionEngine, TcpDialer};
use crate::tickets::{KeyRing, KeyRingTicketer};

/// Handshake deadline when none is configured.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Lifetime hint sent with issued tickets.
pub const DEFAULT_TICKET_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const ACCEPT_QUEUE_DEPTH: usize = 64;
const MAX_POOLED_HELLO_BUFFERS: usize = 256;

type Intercepted = HelloInterceptingConnection<TcpStream>;

/// Anything that yields accepted byte streams.
pub trait StreamListener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Next accepted stream; `None` once the listener has stopped.
    fn accept(&mut self) -> impl Future<Output = Option<Self::Stream>> + Send;

    fn local_addr(&self) -> SocketAddr;
}

/// Everything needed to bind a [`ProbeResistantListener`].
pub struct ListenerSettings {
    pub bind_address: String,
    pub max_connections: usize,
    pub handshake_timeout: Duration,
    pub loopback_bypass: bool,
    pub reaction: HandshakeReaction,
    pub identity: ServerIdentity,
    pub ticket_lifetime: Duration,
    pub negotiator: Option<Arc<dyn PreTlsNegotiator>>,
    pub dialer: Arc<dyn Dial>,
}

impl ListenerSettings {
    /// Settings with defaults for everything but the address and identity.
    pub fn new(bind_address: impl Into<String>, identity: ServerIdentity) -> Self {
        Self {
            bind_address: bind_address.into(),
            max_connections: 1024,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            loopback_bypass: true,
            reaction: HandshakeReaction::Close,
            identity,
            ticket_lifetime: DEFAULT_TICKET_LIFETIME,
            negotiator: None,
            dialer: Arc::new(TcpDialer::default()),
        }
    }
}

/// TLS listener that only completes handshakes for ticket holders.
#[derive(Debug)]
pub struct ProbeResistantListener {
    local_addr: SocketAddr,
    accepted: mpsc::Receiver<AcceptedConnection>,
    tracker: ConnectionTracker,
    accept_task: JoinHandle<()>,
}

impl ProbeResistantListener {
    /// Bind and start accepting in the background.
    ///
    /// Only configuration problems (address, certificate) fail here; per
    /// connection errors are logged and never stop the accept loop.
    pub async fn bind(
        settings: ListenerSettings,
        key_ring: Arc<KeyRing>,
        sink: Arc<dyn ProbeSink>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self, ListenerError> {
        let ticketer = Arc::new(KeyRingTicketer::new(
            Arc::clone(&key_ring),
            settings.ticket_lifetime,
        ));
        let server_config = build_server_config(settings.identity, ticketer)?;
        let listener = Listener::bind(&settings.bind_address, settings.max_connections).await?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        let (accepted_tx, accepted) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let gate = Arc::new(Gate {
            server_config,
            inspector: HelloInspector::new(
                key_ring,
                sink,
                settings.reaction.clone(),
                settings.loopback_bypass,
            ),
            engine: ReactionEngine::new(settings.dialer),
            pool: HelloBufferPool::new(settings.max_connections.min(MAX_POOLED_HELLO_BUFFERS)),
            negotiator: settings.negotiator,
            handshake_timeout: settings.handshake_timeout,
            accepted_tx,
        });

        tracing::info!(
            address = %local_addr,
            reaction = %settings.reaction,
            handshake_timeout_ms = settings.handshake_timeout.as_millis() as u64,
            mimicry = gate.negotiator.is_some(),
            "Probe-resistant listener ready"
        );

        let tracker = ConnectionTracker::new();
        let accept_task = tokio::spawn(accept_loop(listener, gate, tracker.clone(), shutdown));

        Ok(Self {
            local_addr,
            accepted,
            tracker,
            accept_task,
        })
    }

    /// Next authenticated connection, `None` after shutdown.
    pub async fn accept(&mut self) -> Option<AcceptedConnection> {
        self.accepted.recv().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently handshaking, reacting or accepted.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Wait for in-flight connections to finish, up to `grace`.
    pub async fn drain(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.tracker.wait_idle()).await.is_ok()
    }
}

impl Drop for ProbeResistantListener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl StreamListener for ProbeResistantListener {
    type Stream = AcceptedConnection;

    fn accept(&mut self) -> impl Future<Output = Option<Self::Stream>> + Send {
        self.accepted.recv()
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// State shared by every per-connection task of one listener.
struct Gate {
    server_config: Arc<ServerConfig>,
    inspector: HelloInspector,
    engine: ReactionEngine,
    pool: Arc<HelloBufferPool>,
    negotiator: Option<Arc<dyn PreTlsNegotiator>>,
    handshake_timeout: Duration,
    accepted_tx: mpsc::Sender<AcceptedConnection>,
}

async fn accept_loop(
    listener: Listener,
    gate: Arc<Gate>,
    tracker: ConnectionTracker,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut backoff = AcceptBackoff::default();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Listener received shutdown signal, exiting accept loop");
                break;
            }
            _ = gate.accepted_tx.closed() => {
                tracing::debug!("Listener handle dropped, exiting accept loop");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, peer, permit)) => {
                    backoff.on_success();
                    let guard = tracker.track();
                    let gate = Arc::clone(&gate);
                    tokio::spawn(async move {
                        gate.handle(stream, peer, permit, guard).await;
                    });
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    let pause = backoff.on_failure();
                    tracing::warn!(
                        error = %e,
                        consecutive_failures = backoff.consecutive_failures(),
                        pause_ms = pause.as_millis() as u64,
                        "Accept failed"
                    );
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

impl Gate {
    async fn handle(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        guard: ConnectionGuard,
    ) {
        let connection_id = guard.id();
        let _ = stream.set_nodelay(true);

        if let Some(negotiator) = &self.negotiator {
            if negotiator.negotiate(&mut stream, peer).await == Negotiation::Refused {
                metrics::record_connection("refused");
                return;
            }
        }

        let deadline = Instant::now() + self.handshake_timeout;
        let (conn, handle) = HelloInterceptingConnection::new(stream, &self.pool);
        let acceptor = LazyConfigAcceptor::new(Acceptor::default(), conn);

        let (start, decision) = match timeout_at(deadline, acceptor).await {
            Ok(Ok(start)) => {
                let decision = handle
                    .inspect(|raw| self.inspector.on_hello(peer, raw))
                    .unwrap_or_else(|| {
                        self.inspector
                            .reject(peer, RejectReason::MalformedClientHello)
                    });
                (Some(start), decision)
            }
            Ok(Err(e)) => {
                tracing::trace!(connection_id = %connection_id, error = %e, "TLS library refused hello");
                handle.inspect(|_| ());
                let decision = self
                    .inspector
                    .reject(peer, RejectReason::MalformedClientHello);
                (None, decision)
            }
            Err(_) => {
                handle.inspect(|_| ());
                let decision = self.inspector.reject(peer, RejectReason::HandshakeTimeout);
                (None, decision)
            }
        };

        match (decision, start) {
            (Decision::Continue, Some(start)) => {
                self.complete(start, handle, deadline, peer, permit, guard)
                    .await;
            }
            (Decision::Reject { reaction, .. }, Some(start)) if reaction.is_monitor_only() => {
                self.complete(start, handle, deadline, peer, permit, guard)
                    .await;
            }
            (decision, start) => {
                drop(start);
                let reaction = match decision {
                    Decision::Reject { reaction, .. } => reaction,
                    Decision::Continue => HandshakeReaction::Close,
                };
                self.react(&reaction, &handle, connection_id).await;
            }
        }
    }

    async fn complete(
        &self,
        start: StartHandshake<Intercepted>,
        handle: InterceptHandle<TcpStream>,
        deadline: Instant,
        peer: SocketAddr,
        permit: ConnectionPermit,
        guard: ConnectionGuard,
    ) {
        let server_name = start.client_hello().server_name().map(str::to_owned);
        handle.pass_through();

        let handshake = start.into_stream(Arc::clone(&self.server_config));
        match timeout_at(deadline, handshake).await {
            Ok(Ok(tls)) => {
                metrics::record_connection("accepted");
                tracing::debug!(
                    connection_id = %guard.id(),
                    peer_addr = %peer,
                    server_name = server_name.as_deref().unwrap_or(""),
                    resumed = tls.get_ref().1.handshake_kind()
                        == Some(rustls::HandshakeKind::Resumed),
                    "TLS handshake complete"
                );
                let accepted = AcceptedConnection {
                    inner: tls,
                    peer_addr: peer,
                    server_name,
                    id: guard.id(),
                    _guard: guard,
                    _permit: permit,
                };
                if self.accepted_tx.send(accepted).await.is_err() {
                    tracing::debug!(peer_addr = %peer, "Listener gone, dropping connection");
                }
            }
            Ok(Err(e)) => {
                metrics::record_connection("handshake_failed");
                tracing::debug!(connection_id = %guard.id(), error = %e, "TLS handshake failed");
            }
            Err(_) => {
                metrics::record_connection("timeout");
                tracing::debug!(connection_id = %guard.id(), "Handshake deadline expired after accept");
            }
        }
    }

    async fn react(
        &self,
        reaction: &HandshakeReaction,
        handle: &InterceptHandle<TcpStream>,
        connection_id: ConnectionId,
    ) {
        let Some(Detached { io, hello }) = handle.detach() else {
            return;
        };
        metrics::record_connection("rejected");
        if hello.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                reaction = %reaction,
                "Reacting with nothing captured"
            );
        } else {
            tracing::trace!(
                connection_id = %connection_id,
                reaction = %reaction,
                captured = hello.len(),
                "Reacting"
            );
        }
        match self.engine.execute(reaction, io, hello).await {
            Ok(outcome) => {
                tracing::debug!(connection_id = %connection_id, outcome = ?outcome, "Reaction finished");
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Reaction failed");
            }
        }
    }
}

/// An authenticated TLS connection.
///
/// Holds its connection slot until dropped.
pub struct AcceptedConnection {
    inner: TlsStream<Intercepted>,
    peer_addr: SocketAddr,
    server_name: Option<String>,
    id: ConnectionId,
    _guard: ConnectionGuard,
    _permit: ConnectionPermit,
}

impl AcceptedConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// SNI the client asked for, if any.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the handshake resumed a ticket-backed session.
    pub fn resumed(&self) -> bool {
        self.inner.get_ref().1.handshake_kind() == Some(rustls::HandshakeKind::Resumed)
    }
}

impl std::fmt::Debug for AcceptedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptedConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for AcceptedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for AcceptedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
