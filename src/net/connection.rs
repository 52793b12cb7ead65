//! Per-connection request handling.
//!
//! # Responsibilities
//! - Drive one connection through read → rate check → dispatch → write
//! - Honor keep-alive between exchanges
//! - Contain every failure to the connection it happened on
//! - Track live connection count for metrics
//!
//! ```text
//! Accepted → Reading → RateChecking → Dispatching → Writing ─┐
//!               ▲                                            │ keep-alive
//!               └────────────────────────────────────────────┘
//!            any terminal error / close → Closed
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{body::Body, extract::ConnectInfo, http::StatusCode, Router};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tower::ServiceExt;

use crate::config::{RequestLimits, TimeoutConfig};
use crate::http::request::{read_request, wants_keep_alive};
use crate::http::response::{self, write_response};
use crate::lifecycle::shutdown::stopped;
use crate::observability::metrics;
use crate::security::rate_limit::{Admission, RateLimiter};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Reading,
    RateChecking,
    Dispatching,
    Writing,
    Closed,
}

/// Counts live connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Decrements the tracker's count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Turns accepted streams into request/response exchanges.
///
/// Cheap to clone; one clone moves into each connection task.
#[derive(Clone)]
pub struct ConnectionHandler {
    router: Router,
    limiter: Option<Arc<RateLimiter>>,
    limits: RequestLimits,
    read_timeout: Duration,
    idle_timeout: Duration,
}

impl ConnectionHandler {
    /// `limiter` is `None` when rate limiting is disabled.
    pub fn new(
        router: Router,
        limiter: Option<Arc<RateLimiter>>,
        limits: RequestLimits,
        timeouts: &TimeoutConfig,
    ) -> Self {
        Self {
            router,
            limiter,
            limits,
            read_timeout: Duration::from_secs(timeouts.read_secs),
            idle_timeout: Duration::from_secs(timeouts.idle_secs),
        }
    }

    /// Serve `stream` until the peer closes, asks to close, misbehaves, or
    /// shutdown is signalled while the connection is waiting for a request.
    pub async fn handle<S>(&self, stream: S, peer: SocketAddr, mut shutdown: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let id = ConnectionId::new();
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut state = ConnectionState::Accepted;
        let mut served: u64 = 0;
        tracing::trace!(connection_id = %id, peer = %peer, "Connection opened");

        loop {
            transition(id, &mut state, ConnectionState::Reading);
            // Shutdown only interrupts a connection with nothing of the next
            // request received; a partly received request is read to the end.
            if reader.buffer().is_empty() {
                let wait = if served == 0 { self.read_timeout } else { self.idle_timeout };
                let ready = tokio::select! {
                    biased;

                    ready = tokio::time::timeout(wait, reader.fill_buf()) => {
                        ready.map(|filled| filled.map(|buf| buf.is_empty()))
                    }
                    _ = stopped(&mut shutdown) => {
                        tracing::debug!(connection_id = %id, "Closing idle connection for shutdown");
                        break;
                    }
                };
                match ready {
                    Ok(Ok(false)) => {}
                    Ok(Ok(true)) => break,
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Read failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(connection_id = %id, peer = %peer, timeout = ?wait, "Timed out waiting for request");
                        break;
                    }
                }
            }

            let read =
                tokio::time::timeout(self.read_timeout, read_request(&mut reader, &self.limits)).await;

            let request = match read {
                Ok(Ok(Some(request))) => request,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Malformed request, closing");
                    metrics::record_parse_error(e.kind());
                    break;
                }
                Err(_) => {
                    tracing::debug!(connection_id = %id, peer = %peer, timeout = ?self.read_timeout, "Timed out reading request");
                    break;
                }
            };

            let start = Instant::now();
            let version = request.version();
            let method = request.method().clone();

            transition(id, &mut state, ConnectionState::RateChecking);
            if let Some(limiter) = &self.limiter {
                let source = peer.ip().to_string();
                if let Admission::Denied { retry_after } = limiter.check(&source, start) {
                    tracing::debug!(connection_id = %id, source = %source, "Exceeded rate limit");
                    metrics::record_rate_limited();
                    transition(id, &mut state, ConnectionState::Writing);
                    let denied = response::too_many_requests(retry_after);
                    if let Err(e) = write_response(&mut writer, &denied, version, false).await {
                        tracing::warn!(connection_id = %id, error = %e, "Write failed");
                    }
                    metrics::record_request(&method, StatusCode::TOO_MANY_REQUESTS.as_u16(), start);
                    break;
                }
            }

            transition(id, &mut state, ConnectionState::Dispatching);
            tracing::info!(
                connection_id = %id,
                peer = %peer,
                method = %method,
                target = %request.uri(),
                "Request"
            );
            let client_keep_alive = wants_keep_alive(&request);
            let mut request = request.map(Body::from);
            request.extensions_mut().insert(ConnectInfo(peer));
            let routed = match self.router.clone().oneshot(request).await {
                Ok(routed) => routed,
                Err(never) => match never {},
            };
            let routed = response::into_bytes(routed).await;

            transition(id, &mut state, ConnectionState::Writing);
            let keep_alive = client_keep_alive && !*shutdown.borrow();
            let status = routed.status().as_u16();
            if let Err(e) = write_response(&mut writer, &routed, version, keep_alive).await {
                tracing::warn!(connection_id = %id, peer = %peer, error = %e, "Write failed");
                break;
            }
            metrics::record_request(&method, status, start);
            served += 1;

            if !keep_alive {
                break;
            }
        }

        let _ = writer.shutdown().await;
        transition(id, &mut state, ConnectionState::Closed);
        tracing::trace!(connection_id = %id, served, "Connection closed");
    }
}

fn transition(id: ConnectionId, state: &mut ConnectionState, next: ConnectionState) {
    tracing::trace!(connection_id = %id, from = ?*state, to = ?next, "Connection state");
    *state = next;
}
