//! Resilience helpers.
//!
//! # Design Decisions
//! - Transient accept errors never end the accept loop
//! - Retries are spaced with jittered exponential backoff

pub mod backoff;
