//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (service.rs):
//!     Bind listener (fatal on error) → spawn accept loop → spawn sweeper
//!
//! Stop (service.rs + shutdown.rs):
//!     Trigger shutdown → stop accepting, release port → drain connections
//!     (deadline, then abort) → join background tasks
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful stop; a second one → hard exit
//! ```
//!
//! # Design Decisions
//! - Lifecycle state lives in one object, not process-wide flags
//! - start/stop serialized by an async mutex
//! - Shutdown has a deadline: connections still open after it are aborted

pub mod service;
pub mod shutdown;
pub mod signals;

pub use service::{LifecycleError, TrackerService};
pub use shutdown::Shutdown;
