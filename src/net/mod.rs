//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, drain on shutdown)
//!     → connection.rs (per-connection exchange loop)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded connection count prevents resource exhaustion
//! - Accept errors are logged and retried, never fatal
//! - One task per connection; connections share only the rate limiter

pub mod connection;
pub mod listener;

pub use connection::{ConnectionHandler, ConnectionId, ConnectionState};
pub use listener::{Listener, ListenerError};
