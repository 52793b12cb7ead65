//! Node registry contract.
//!
//! The tracker core never touches storage directly. It issues
//! [`NodeRegistry::upsert_node`] and [`NodeRegistry::lookup_node`] and turns
//! the outcome into a response status for that one exchange. [`memory`]
//! provides an in-process implementation with an optional JSON snapshot.

pub mod memory;

use std::net::SocketAddrV4;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryRegistry;

/// A registered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: u64,
    pub address: SocketAddrV4,
    /// Unix seconds of the latest upsert.
    pub last_registration: u64,
}

impl PeerRecord {
    pub fn new(id: u64, address: SocketAddrV4) -> Self {
        Self {
            id,
            address,
            last_registration: unix_now(),
        }
    }
}

/// Errors surfaced by a registry backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node {0} not found")]
    NotFound(u64),

    /// The backing store failed; the message is for logs only.
    #[error("registry storage error: {0}")]
    Storage(String),
}

/// Peer id → address store the tracker reads and writes through.
///
/// Implementations must be `Send + Sync`; every connection task calls into
/// the same instance.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Create or replace the record for `id`.
    async fn upsert_node(&self, id: u64, address: SocketAddrV4) -> Result<(), RegistryError>;

    /// Fetch the record for `id`, or [`RegistryError::NotFound`].
    async fn lookup_node(&self, id: u64) -> Result<PeerRecord, RegistryError>;
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
