//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request:
//!     → rate_limit.rs (per-source fixed window)
//!     → admitted: dispatch / denied: 429 and close
//! ```
//!
//! # Design Decisions
//! - Rate limiting runs before any registry work
//! - No trust in client input

pub mod rate_limit;

pub use rate_limit::{Admission, RateLimiter};
