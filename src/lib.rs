//! Adaptive request defense gateway library.

pub mod admin;
pub mod clock;
pub mod config;
pub mod defense;
pub mod detection;
pub mod gate;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod store;

pub use config::schema::GateConfig;
pub use gate::{BlockCode, Decision, Gatekeeper};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
