//! In-memory registry with JSON snapshot persistence.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::net::SocketAddrV4;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{NodeRegistry, PeerRecord, RegistryError};

/// A thread-safe registry backed by a [`DashMap`].
///
/// Cloning shares the same map.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    inner: Arc<DashMap<u64, PeerRecord>>,
    persistence_path: Option<String>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new(persistence_path: Option<String>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
        }
    }

    /// Load a snapshot if the file exists, otherwise start empty.
    pub fn load_from_file(path: &str) -> std::io::Result<Self> {
        let registry = Self::new(Some(path.to_string()));
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            let records: Vec<PeerRecord> = serde_json::from_reader(reader)?;
            for record in records {
                registry.inner.insert(record.id, record);
            }
            tracing::info!(path, nodes = registry.inner.len(), "Loaded registry snapshot");
        }
        Ok(registry)
    }

    /// Write a snapshot to the configured path. No-op without one.
    pub fn save_to_file(&self) -> std::io::Result<()> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };

        let mut records: Vec<PeerRecord> = self.inner.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.id);

        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &records)?;
        tracing::info!(path = %path, nodes = records.len(), "Saved registry snapshot");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl NodeRegistry for MemoryRegistry {
    async fn upsert_node(&self, id: u64, address: SocketAddrV4) -> Result<(), RegistryError> {
        self.inner.insert(id, PeerRecord::new(id, address));
        tracing::debug!(node_id = id, address = %address, "Node added or updated");
        Ok(())
    }

    async fn lookup_node(&self, id: u64) -> Result<PeerRecord, RegistryError> {
        self.inner
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(RegistryError::NotFound(id))
    }
}
