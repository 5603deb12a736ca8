//! Tee-then-switch connection wrapper.
//!
//! # States
//! ```text
//! Unread → Buffering → HelloCaptured → Passthrough
//! ```
//! - `Buffering`: reads are copied into the capture buffer and handed to the
//!   TLS library; library writes are swallowed so nothing reaches the peer
//!   before a decision exists
//! - `HelloCaptured`: the inspector is looking at the captured bytes
//! - `Passthrough`: reads and writes go straight to the socket, the capture
//!   buffer is back in the pool
//!
//! The TLS library owns the [`HelloInterceptingConnection`]; the accept task
//! keeps the paired [`InterceptHandle`] to drive the transitions and, on a
//! rejection, to take the raw socket back.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::hello::pool::{HelloBufferPool, PooledBuffer};

/// Upper bound on bytes captured before the hello is available.
pub const MAX_HELLO_CAPTURE: usize = 64 * 1024;

/// Interception progress. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Unread,
    Buffering,
    HelloCaptured,
    Passthrough,
}

impl ConnectionState {
    fn advance(&mut self, next: ConnectionState) {
        if next > *self {
            *self = next;
        }
    }

    fn before_decision(self) -> bool {
        self < ConnectionState::Passthrough
    }
}

struct Shared<S> {
    io: Option<S>,
    state: ConnectionState,
    capture: Option<PooledBuffer>,
}

/// Raw socket plus everything captured from it, handed to a reaction.
#[derive(Debug)]
pub struct Detached<S> {
    pub io: S,
    pub hello: CapturedHello,
}

/// Bytes the peer sent before the decision, still on loan from the pool.
#[derive(Debug)]
pub struct CapturedHello {
    buf: Option<PooledBuffer>,
}

impl CapturedHello {
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_deref().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Keep a private copy for replay and release the pooled buffer.
    pub fn into_replay(self) -> Vec<u8> {
        match self.buf {
            Some(buf) => buf.into_private_copy(),
            None => Vec::new(),
        }
    }
}

/// Connection handed to the TLS library while the ClientHello is captured.
pub struct HelloInterceptingConnection<S> {
    shared: Arc<Mutex<Shared<S>>>,
}

/// Control side of a [`HelloInterceptingConnection`].
pub struct InterceptHandle<S> {
    shared: Arc<Mutex<Shared<S>>>,
}

impl<S> HelloInterceptingConnection<S> {
    /// Wrap `io`, borrowing a capture buffer from `pool`.
    pub fn new(io: S, pool: &Arc<HelloBufferPool>) -> (Self, InterceptHandle<S>) {
        let shared = Arc::new(Mutex::new(Shared {
            io: Some(io),
            state: ConnectionState::Unread,
            capture: Some(pool.acquire()),
        }));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            InterceptHandle { shared },
        )
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }
}

impl<S> InterceptHandle<S> {
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    /// Run `inspect` over the captured bytes, at most once per connection.
    ///
    /// Returns `None` if the hello was already inspected.
    pub fn inspect<T>(&self, inspect: impl FnOnce(&[u8]) -> T) -> Option<T> {
        let mut shared = lock(&self.shared);
        if shared.state >= ConnectionState::HelloCaptured {
            return None;
        }
        shared.state.advance(ConnectionState::HelloCaptured);
        let captured = shared.capture.as_deref().map(Vec::as_slice).unwrap_or_default();
        Some(inspect(captured))
    }

    /// Stop teeing, release the capture buffer and let writes through.
    pub fn pass_through(&self) {
        let mut shared = lock(&self.shared);
        shared.state.advance(ConnectionState::Passthrough);
        shared.capture = None;
    }

    /// Take the raw socket and the captured bytes away from the TLS library.
    ///
    /// The wrapper left behind reads EOF and refuses writes.
    pub fn detach(&self) -> Option<Detached<S>> {
        let mut shared = lock(&self.shared);
        shared.state.advance(ConnectionState::Passthrough);
        let io = shared.io.take()?;
        Some(Detached {
            io,
            hello: CapturedHello {
                buf: shared.capture.take(),
            },
        })
    }
}

fn lock<S>(shared: &Mutex<Shared<S>>) -> MutexGuard<'_, Shared<S>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection handed to reaction")
}

impl<S: AsyncRead + Unpin> AsyncRead for HelloInterceptingConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;
        let Some(io) = shared.io.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        shared.state.advance(ConnectionState::Buffering);
        let before = buf.filled().len();
        ready!(Pin::new(io).poll_read(cx, buf))?;

        if shared.state == ConnectionState::Buffering {
            if let Some(capture) = shared.capture.as_mut() {
                let fresh = &buf.filled()[before..];
                if capture.len() + fresh.len() > MAX_HELLO_CAPTURE {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "client hello exceeds capture limit",
                    )));
                }
                capture.extend_from_slice(fresh);
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HelloInterceptingConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut shared = lock(&self.shared);
        if shared.state.before_decision() {
            return Poll::Ready(Ok(buf.len()));
        }
        match shared.io.as_mut() {
            Some(io) => Pin::new(io).poll_write(cx, buf),
            None => Poll::Ready(Err(detached())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut shared = lock(&self.shared);
        if shared.state.before_decision() {
            return Poll::Ready(Ok(()));
        }
        match shared.io.as_mut() {
            Some(io) => Pin::new(io).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut shared = lock(&self.shared);
        if shared.state.before_decision() {
            return Poll::Ready(Ok(()));
        }
        match shared.io.as_mut() {
            Some(io) => Pin::new(io).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
