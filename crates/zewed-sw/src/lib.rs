//! # Zewed SW
//!
//! Offline worker engine for the ZewedJobs web application.
//!
//! ## Features
//!
//! - **Classification**: maps each intercepted request onto a caching strategy
//! - **Strategies**: network-first, cache-first with background refresh,
//!   placeholder and offline-document fallbacks, network-only
//! - **Lifecycle**: versioned install and activation with partition cleanup
//! - **Background sync**: durable replay of offline actions, periodic job refresh
//! - **Notifications**: push payload handling and interaction routing
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker::dispatch(WorkerEvent)
//!     ├── Classifier ──► StrategyEngine ──► PartitionStore / Network
//!     ├── LifecycleManager ──► Registration (shared across versions)
//!     ├── SyncCoordinator ──► SyncQueue ──► Network
//!     └── NotificationBridge ──► NotificationDisplay / ClientBroadcaster
//! ```
//!
//! Platform services are injected as [`Capabilities`] so every component can
//! be exercised against fakes.

pub mod classify;
pub mod clients;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod messages;
pub mod network;
pub mod notify;
pub mod request;
pub mod strategy;
pub mod sync;
pub mod tasks;
pub mod worker;

pub use classify::{BypassReason, Classification, Classifier, Route, Strategy};
pub use clients::{
    broadcast, BroadcastMessage, ClientBroadcaster, ClientError, ClientInfo, ClientType,
};
pub use config::{CacheConfig, ConfigError, PartitionConfig, PartitionRole};
pub use error::{FailureReason, WorkerError, WorkerResult};
pub use lifecycle::{
    ActivationReport, InstallReport, LifecycleManager, PrecacheReport, Registration,
    SharedRegistration, WorkerState, WorkerVersion,
};
pub use messages::{ControlMessage, ControlReply, PartitionStatus};
pub use network::{HttpConfig, HttpNetwork, Network, NetworkError, NetworkRequest};
pub use notify::{
    ClickOutcome, DisplayError, DisplayRequest, Importance, NotificationBridge, NotificationData,
    NotificationDisplay, PushPayload,
};
pub use request::{IncomingRequest, RequestDescriptor, Response, ResponseSource};
pub use strategy::StrategyEngine;
pub use sync::{RefreshReport, ReplayReport, SyncCoordinator, SyncOutcome, SyncTrigger};
pub use tasks::BackgroundTasks;
pub use worker::{Capabilities, EventOutcome, FetchDecision, ServiceWorker, WorkerEvent};
