//! Attack signature detection.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → snapshot.rs (owned view: method, url, headers, query, parsed body)
//!     → scorer.rs (run rules.rs table over body values, query values, raw URL,
//!                  plus user-agent and payload-size predicates)
//!     → ThreatScore (findings + total)
//!     → gate accumulates into a SecurityThreatContext
//! ```
//!
//! # Design Decisions
//! - Scoring is pure: no I/O, no hidden state, deterministic per input
//! - A missing header is a signal, never an error
//! - Finding detail is for audit only; clients see a generic message

pub mod rules;
pub mod scorer;
pub mod snapshot;
pub mod types;

pub use scorer::ThreatScorer;
pub use snapshot::RequestSnapshot;
pub use types::{DetectionError, SecurityThreatContext, ThreatCategory, ThreatFinding, ThreatScore};
