//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! accepted connection
//!     → request.rs (parse one HTTP/1.x request, enforce limits)
//!     → [rate limit check in net::connection]
//!     → routes.rs (axum Router: registry calls or plain acknowledgement)
//!     → response.rs (buffer, add content-length/connection, write)
//! ```

pub mod request;
pub mod response;
pub mod routes;

pub use request::{read_request, wants_keep_alive, ParseError};
pub use response::{write_response, SERVER_NAME};
pub use routes::{build_router, ApiError, RegisterNode};
