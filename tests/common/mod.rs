//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use peer_tracker::{MemoryRegistry, NodeRegistry, PeerRecord, RegistryError, TrackerConfig, TrackerService};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Defaults with an ephemeral loopback port and a short drain.
pub fn test_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.shutdown.drain_timeout_secs = 2;
    config
}

/// Start a tracker and return it with its bound address.
pub async fn start_tracker(config: TrackerConfig, registry: Arc<dyn NodeRegistry>) -> (TrackerService, SocketAddr) {
    let service = TrackerService::new(config, registry);
    let addr = service.start().await.expect("tracker should start");
    (service, addr)
}

/// Start a tracker over a fresh in-memory registry.
pub async fn start_memory_tracker(config: TrackerConfig) -> (TrackerService, SocketAddr, MemoryRegistry) {
    let registry = MemoryRegistry::new(None);
    let (service, addr) = start_tracker(config, Arc::new(registry.clone())).await;
    (service, addr, registry)
}

/// Client that opens a new connection per request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Write raw bytes, half-close, and collect whatever the tracker sends back.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("tracker should close the connection")
        .unwrap();
    String::from_utf8(out).unwrap()
}

/// Registry whose every call fails with a storage error.
pub struct FailingRegistry;

#[async_trait]
impl NodeRegistry for FailingRegistry {
    async fn upsert_node(&self, _: u64, _: SocketAddrV4) -> Result<(), RegistryError> {
        Err(RegistryError::Storage("connection to store lost".into()))
    }

    async fn lookup_node(&self, _: u64) -> Result<PeerRecord, RegistryError> {
        Err(RegistryError::Storage("connection to store lost".into()))
    }
}

/// Wraps a memory registry, counting calls and optionally sleeping first.
#[derive(Default)]
pub struct InstrumentedRegistry {
    pub inner: MemoryRegistry,
    pub delay: Duration,
    pub upserts: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl InstrumentedRegistry {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeRegistry for InstrumentedRegistry {
    async fn upsert_node(&self, id: u64, address: SocketAddrV4) -> Result<(), RegistryError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.upsert_node(id, address).await
    }

    async fn lookup_node(&self, id: u64) -> Result<PeerRecord, RegistryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.lookup_node(id).await
    }
}
