//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GateConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → watcher diffs it against the running config
//!     → PolicyUpdate (detection + CSRF) sent only if that part changed
//!     → gatekeeper swaps its policy atomically
//! ```
//!
//! # Design Decisions
//! - Only the stateless scoring and CSRF policy reload live; lockout and
//!   throttle thresholds are fixed until restart so counters keep one meaning
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, CaptchaConfig, CsrfConfig, DetectionConfig, Escalation,
    FailurePolicy, GateConfig, ListenerConfig, LockoutConfig, LogFormat, ObservabilityConfig,
    ThrottleConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::PolicyUpdate;
