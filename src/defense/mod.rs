//! Stateful defenses: anti-forgery tokens, lockout, throttling, CAPTCHA.
//!
//! # Data Flow
//! ```text
//! gate (every request)
//!     → csrf.rs      validate token on mutating requests
//!     → throttle.rs  is the source IP blocked?
//! login POST (after the gate allows it)
//!     → login.rs     precheck: throttle.rs → lockout.rs → captcha.rs
//!     → upstream
//!     → login.rs     record outcome into lockout.rs + throttle.rs
//! ```
//!
//! # Design Decisions
//! - All state lives in the injected store; managers are cheap to clone
//! - Counters only change through the store's atomic increment
//! - Lock timestamps are epoch millis from the injected clock

pub mod captcha;
pub mod csrf;
pub mod lockout;
pub mod login;
pub mod throttle;

pub use captcha::{CaptchaContext, CaptchaPolicy, CaptchaProvider, StubCaptchaProvider};
pub use csrf::{CsrfProtocol, CsrfToken};
pub use lockout::{FailureOutcome, LockoutManager, LockoutState, LockoutStatus};
pub use login::{LoginAttempt, LoginGuard};
pub use throttle::{IpBlockStatus, IpThrottle, IpThrottleState, ThrottleReason};
