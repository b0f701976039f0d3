//! # Zewed Test
//!
//! Fakes and behavioural suites for the ZewedJobs offline worker.
//!
//! ## Test Types
//!
//! 1. **Strategy tests**: each caching strategy against a scripted network
//! 2. **Lifecycle tests**: install, activation, version replacement
//! 3. **Sync tests**: queue replay and the periodic job refresh
//! 4. **Notification tests**: push payloads and interaction routing
//! 5. **Dispatch tests**: control messages and end-to-end event handling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zewed_test::{test_config, TestWorld};
//!
//! let world = TestWorld::new();
//! let worker = world.active_worker(test_config("v1")).await;
//! let response = world.get(&worker, "/api/jobs").await;
//! ```

pub mod fakes;
pub mod world;

pub use fakes::{
    FailingStore, MockNetwork, RecordedRequest, RecordingClients, RecordingDisplay, Reply,
};
pub use world::{test_config, url, TestWorld, FONT_CSS, ORIGIN, START_MILLIS};

#[cfg(test)]
mod dispatch;
#[cfg(test)]
mod lifecycle;
#[cfg(test)]
mod notifications;
#[cfg(test)]
mod strategies;
