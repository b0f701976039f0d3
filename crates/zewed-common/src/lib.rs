//! # Zewed Common
//!
//! Shared plumbing for the ZewedJobs offline worker crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - A `Clock` abstraction so expiry and retention logic can be driven by tests

pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
