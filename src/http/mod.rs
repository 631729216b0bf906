//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers)
//!     → request.rs (assign x-request-id)
//!     → gate middleware (decide, or reject with a JSON error)
//!     → /_gate/csrf handler, or
//!     → proxy.rs (forward to the upstream application)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
