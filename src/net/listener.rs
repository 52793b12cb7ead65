//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Survive accept errors (log, back off, keep going)
//! - Stop on shutdown, release the port, drain in-flight connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::config::ListenerConfig;
use crate::lifecycle::shutdown::stopped;
use crate::net::connection::{ConnectionHandler, ConnectionTracker};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

const ACCEPT_BACKOFF_BASE_MS: u64 = 10;
const ACCEPT_BACKOFF_MAX_MS: u64 = 1_000;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address. Fatal at startup.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to accept a connection. Transient.
    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    /// The connection semaphore was closed.
    #[error("connection limiter closed")]
    Closed,
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind and start listening.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source: std::io::Error| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };

        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(config.reuse_address).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let inner = socket.listen(config.backlog).map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            reuse_address = config.reuse_address,
            "Listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            local_addr,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Run the accept loop until `shutdown` flips to `true`.
    ///
    /// The listening socket is closed as soon as shutdown is observed. In-flight
    /// connections then get `drain_timeout` to finish before they are aborted;
    /// this future only resolves once every connection task has ended.
    pub async fn run(
        self,
        handler: ConnectionHandler,
        mut shutdown: watch::Receiver<bool>,
        drain_timeout: Duration,
    ) {
        tracing::info!(address = %self.local_addr, "Accept loop started");

        let tracker = ConnectionTracker::new();
        let mut connections = JoinSet::new();
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut shutdown) => break,

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_join(joined);
                }

                accepted = self.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        consecutive_errors = 0;
                        metrics::record_connection_accepted();

                        let guard = tracker.track();
                        metrics::record_active_connections(tracker.active_count() as usize);

                        let handler = handler.clone();
                        let tracker = tracker.clone();
                        let connection_shutdown = shutdown.clone();
                        connections.spawn(async move {
                            let _permit = permit;
                            handler.handle(stream, peer, connection_shutdown).await;
                            drop(guard);
                            metrics::record_active_connections(tracker.active_count() as usize);
                        });
                    }
                    Err(ListenerError::Closed) => {
                        tracing::error!("Connection limiter closed, stopping accept loop");
                        break;
                    }
                    Err(e) => {
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        metrics::record_accept_error();
                        let delay = calculate_backoff(
                            consecutive_errors,
                            ACCEPT_BACKOFF_BASE_MS,
                            ACCEPT_BACKOFF_MAX_MS,
                        );
                        tracing::warn!(error = %e, retry_in = ?delay, "Accept failed");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = stopped(&mut shutdown) => break,
                        }
                    }
                },
            }
        }

        let Listener { inner, local_addr, .. } = self;
        drop(inner);
        tracing::info!(
            address = %local_addr,
            in_flight = connections.len(),
            "Listener closed, draining connections"
        );

        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(joined) = connections.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "Drain deadline passed, aborting connections"
            );
            connections.shutdown().await;
        }
        tracing::info!(address = %local_addr, "Accept loop stopped");
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Connection task panicked");
        }
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
