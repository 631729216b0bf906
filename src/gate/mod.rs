//! Request gatekeeping.
//!
//! # Data Flow
//! ```text
//! request
//!     → middleware.rs (buffer body, resolve client IP, build snapshot)
//!     → gatekeeper.rs
//!         1. suspicious:{ip} flag or throttle block → IP_BLOCKED
//!         2. ThreatScorer → context
//!         3. anti-forgery token on mutating requests → CSRF_MISSING finding
//!         4. score ≥ threshold → flag IP, SUSPICIOUS_ACTIVITY_DETECTED
//!         5. allow
//!     → login precheck (login paths only)
//!     → audit.rs + metrics
//!     → next handler, context in request extensions
//! ```
//!
//! # Design Decisions
//! - Decisions are explicit values, never exceptions
//! - Store failures go through one policy (degrade.rs): fail-open by default
//! - Explicit blocks are never downgraded by a store failure

pub mod audit;
pub mod decision;
pub(crate) mod degrade;
pub mod gatekeeper;
pub mod middleware;

pub use audit::{AuditRecord, AuditSink, TracingAuditSink};
pub use decision::{BlockCode, Decision, Verdict};
pub use gatekeeper::{GatePolicy, GateStatsSnapshot, Gatekeeper};
pub use middleware::{defense_middleware, GateState};
