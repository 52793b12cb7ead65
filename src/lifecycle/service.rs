//! Start/stop of the tracker's background tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::validation::validate_config;
use crate::config::{ConfigError, TrackerConfig};
use crate::http::routes::build_router;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::ConnectionHandler;
use crate::net::listener::{Listener, ListenerError};
use crate::registry::NodeRegistry;
use crate::security::rate_limit::{run_sweeper, RateLimiter};

/// Errors from [`TrackerService::start`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `start` was called while the service was running. Nothing changed.
    #[error("tracker is already running")]
    AlreadyRunning,

    /// The configuration cannot run, for example a zero sweep interval.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bind(#[from] ListenerError),
}

struct Running {
    shutdown: Shutdown,
    local_addr: SocketAddr,
    accept_loop: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

/// Owns the listener's background execution.
///
/// `start` binds and spawns the accept loop (plus the rate-limit sweeper);
/// `stop` signals shutdown and waits until both have exited, including the
/// connection drain. The service can be started again after a stop. The
/// rate-limit table survives restarts.
pub struct TrackerService {
    config: TrackerConfig,
    registry: Arc<dyn NodeRegistry>,
    limiter: Arc<RateLimiter>,
    running: Mutex<Option<Running>>,
}

impl TrackerService {
    pub fn new(config: TrackerConfig, registry: Arc<dyn NodeRegistry>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        Self {
            config,
            registry,
            limiter,
            running: Mutex::new(None),
        }
    }

    /// Bind the listener and start accepting.
    ///
    /// Returns the bound address. An invalid configuration or a bind failure
    /// leaves the service stopped.
    pub async fn start(&self) -> Result<SocketAddr, LifecycleError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(LifecycleError::AlreadyRunning);
        }
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let listener = Listener::open(&self.config.listener)?;
        let local_addr = listener.local_addr();
        let shutdown = Shutdown::new();

        let rate_limit = &self.config.rate_limit;
        let handler = ConnectionHandler::new(
            build_router(Arc::clone(&self.registry)),
            rate_limit.enabled.then(|| Arc::clone(&self.limiter)),
            self.config.limits,
            &self.config.timeouts,
        );

        let drain_timeout = Duration::from_secs(self.config.shutdown.drain_timeout_secs);
        let accept_loop = tokio::spawn(listener.run(handler, shutdown.subscribe(), drain_timeout));
        let sweeper = rate_limit.enabled.then(|| {
            tokio::spawn(run_sweeper(
                Arc::clone(&self.limiter),
                rate_limit.sweep_interval(),
                shutdown.subscribe(),
            ))
        });

        *running = Some(Running {
            shutdown,
            local_addr,
            accept_loop,
            sweeper,
        });

        tracing::info!(
            address = %local_addr,
            rate_limit_enabled = rate_limit.enabled,
            threshold = rate_limit.threshold,
            window_secs = rate_limit.window_secs,
            "Tracker started"
        );
        Ok(local_addr)
    }

    /// Stop accepting, drain, and wait for every background task to exit.
    ///
    /// Returns immediately when the service is not running.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running {
            shutdown,
            local_addr,
            accept_loop,
            sweeper,
        }) = running.take()
        else {
            return;
        };

        tracing::info!(address = %local_addr, "Tracker stopping");
        shutdown.trigger();

        if let Err(e) = accept_loop.await {
            tracing::error!(error = %e, "Accept loop ended abnormally");
        }
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::error!(error = %e, "Rate limit sweeper ended abnormally");
            }
        }
        tracing::info!(address = %local_addr, "Tracker stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

impl Drop for TrackerService {
    fn drop(&mut self) {
        // Background tasks notice the dropped sender and wind down on their own.
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.trigger();
        }
    }
}
