//! Peer registration tracker.
//!
//! Accepts connections from peer nodes, rate limits them per source address,
//! and serves registration (`PUT /nodes/{id}`) and lookup (`GET /nodes/{id}`)
//! against a pluggable node registry.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod security;

pub use config::TrackerConfig;
pub use lifecycle::{LifecycleError, Shutdown, TrackerService};
pub use registry::{MemoryRegistry, NodeRegistry, PeerRecord, RegistryError};
pub use security::RateLimiter;
