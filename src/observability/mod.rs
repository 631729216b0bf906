//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, `audit` target for gate verdicts)
//!     → metrics.rs (counters for decisions, findings, lockouts, degradation)
//!
//! Consumers:
//!     → Log aggregation (stdout as pretty text or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every gate log line
//! - Metrics are cheap (atomic increments) and safe to call with no recorder installed

pub mod logging;
pub mod metrics;
