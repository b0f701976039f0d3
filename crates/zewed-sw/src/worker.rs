//! Event dispatch.
//!
//! The host delivers every platform event as a [`WorkerEvent`] and awaits the
//! [`EventOutcome`]. Work that outlives an event is tracked by the worker's
//! [`BackgroundTasks`].

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use zewed_cache::PartitionStore;
use zewed_common::Clock;
use zewed_sync::SyncQueue;

use crate::classify::{BypassReason, Classification, Classifier};
use crate::clients::{broadcast, BroadcastMessage, ClientBroadcaster};
use crate::config::CacheConfig;
use crate::error::WorkerResult;
use crate::lifecycle::{
    ActivationReport, InstallReport, LifecycleManager, SharedRegistration, WorkerState,
};
use crate::messages::{ControlMessage, ControlReply, PartitionStatus};
use crate::network::Network;
use crate::notify::{
    ClickOutcome, DisplayRequest, NotificationBridge, NotificationData, NotificationDisplay,
};
use crate::request::{IncomingRequest, RequestDescriptor, Response};
use crate::strategy::StrategyEngine;
use crate::sync::{SyncCoordinator, SyncOutcome};
use crate::tasks::BackgroundTasks;

/// Capabilities injected by the host.
#[derive(Clone)]
pub struct Capabilities {
    pub store: Arc<dyn PartitionStore>,
    pub network: Arc<dyn Network>,
    pub clients: Arc<dyn ClientBroadcaster>,
    pub display: Arc<dyn NotificationDisplay>,
    pub queue: SyncQueue,
    pub clock: Arc<dyn Clock>,
    pub registration: SharedRegistration,
}

/// Platform events.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Install this version (and activate it straight after).
    Install,
    /// Activate a version that is waiting.
    Activate,
    /// The host has retired this version.
    Redundant,
    /// An intercepted request.
    Fetch(IncomingRequest),
    /// Connectivity-restore sync trigger.
    Sync(String),
    /// Periodic sync trigger.
    PeriodicSync(String),
    /// Raw push payload.
    Push(Vec<u8>),
    /// Interaction with a shown notification.
    NotificationClick {
        action: Option<String>,
        data: NotificationData,
    },
    /// Control message with its reply channel.
    Message {
        message: JsonValue,
        reply: oneshot::Sender<ControlReply>,
    },
    /// Connectivity changed.
    Connectivity { online: bool },
}

/// How an intercepted request is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDecision {
    /// Not intercepted; the host performs the request itself.
    Bypass(BypassReason),
    /// Answered by the worker.
    Respond(Response),
}

/// Result of dispatching an event.
#[derive(Debug)]
pub enum EventOutcome {
    Installed {
        install: WorkerResult<InstallReport>,
        activation: Option<WorkerResult<ActivationReport>>,
    },
    Activated(WorkerResult<ActivationReport>),
    /// `retired` is false when the version was already redundant.
    Redundant { retired: bool },
    Fetched(FetchDecision),
    Synced(SyncOutcome),
    Pushed(WorkerResult<DisplayRequest>),
    Clicked(WorkerResult<ClickOutcome>),
    Replied(ControlReply),
    ConnectivityChanged { online: bool, replay_scheduled: bool },
}

/// One version of the offline worker.
pub struct ServiceWorker {
    config: Arc<CacheConfig>,
    classifier: Classifier,
    engine: StrategyEngine,
    lifecycle: LifecycleManager,
    sync: SyncCoordinator,
    bridge: NotificationBridge,
    store: Arc<dyn PartitionStore>,
    clients: Arc<dyn ClientBroadcaster>,
    tasks: BackgroundTasks,
}

impl ServiceWorker {
    /// Validate `config` and wire the components together.
    pub fn new(config: CacheConfig, caps: Capabilities) -> WorkerResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let tasks = BackgroundTasks::new();

        let classifier = Classifier::new(&config)?;
        let engine = StrategyEngine::new(
            &config,
            caps.store.clone(),
            caps.network.clone(),
            caps.clock.clone(),
            tasks.clone(),
        )?;
        let lifecycle = LifecycleManager::new(
            config.clone(),
            caps.store.clone(),
            caps.network.clone(),
            caps.clients.clone(),
            caps.registration.clone(),
        );
        let bridge = NotificationBridge::new(
            config.clone(),
            caps.display.clone(),
            caps.clients.clone(),
            caps.queue.clone(),
        );
        let sync = SyncCoordinator::new(
            config.clone(),
            caps.queue.clone(),
            caps.network.clone(),
            caps.store.clone(),
            caps.clients.clone(),
            bridge.clone(),
            caps.clock.clone(),
        );

        info!(version = %config.version, "Worker created");

        Ok(Self {
            config,
            classifier,
            engine,
            lifecycle,
            sync,
            bridge,
            store: caps.store,
            clients: caps.clients,
            tasks,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn sync(&self) -> &SyncCoordinator {
        &self.sync
    }

    pub fn notifications(&self) -> &NotificationBridge {
        &self.bridge
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Lifecycle state of this version.
    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    /// Wait for all background work.
    pub async fn settle(&self) {
        self.tasks.settle().await;
    }

    /// Refuse new background work and wait for what is running.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.settle().await;
        info!(version = %self.config.version, "Worker shut down");
    }

    /// Handle one event.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventOutcome {
        match event {
            WorkerEvent::Install => {
                let install = self.lifecycle.install().await;
                // Skip waiting: activate as soon as install succeeds.
                let activation = if install.is_ok() {
                    Some(self.lifecycle.activate().await)
                } else {
                    None
                };
                EventOutcome::Installed {
                    install,
                    activation,
                }
            }
            WorkerEvent::Activate => EventOutcome::Activated(self.lifecycle.activate().await),
            WorkerEvent::Redundant => {
                let retired = self.lifecycle.make_redundant().await;
                self.shutdown().await;
                EventOutcome::Redundant { retired }
            }
            WorkerEvent::Fetch(request) => EventOutcome::Fetched(self.handle_fetch(&request).await),
            WorkerEvent::Sync(tag) | WorkerEvent::PeriodicSync(tag) => {
                EventOutcome::Synced(self.sync.handle_tag(&tag).await)
            }
            WorkerEvent::Push(bytes) => EventOutcome::Pushed(self.bridge.handle_push(&bytes).await),
            WorkerEvent::NotificationClick { action, data } => {
                EventOutcome::Clicked(self.bridge.handle_click(action.as_deref(), &data).await)
            }
            WorkerEvent::Message { message, reply } => {
                let answer = self.handle_message(&message).await;
                if reply.send(answer.clone()).is_err() {
                    debug!("Control message sender went away before the reply");
                }
                EventOutcome::Replied(answer)
            }
            WorkerEvent::Connectivity { online } => {
                let replay_scheduled = self.connectivity_changed(online).await;
                EventOutcome::ConnectivityChanged {
                    online,
                    replay_scheduled,
                }
            }
        }
    }

    /// Answer an intercepted request.
    pub async fn handle_fetch(&self, incoming: &IncomingRequest) -> FetchDecision {
        if !self.lifecycle.is_serving().await {
            return FetchDecision::Bypass(BypassReason::NotActive);
        }
        let request = match RequestDescriptor::parse(incoming) {
            Ok(request) => request,
            Err(e) => {
                debug!(url = %incoming.url, error = %e, "Unparseable request, bypassing");
                return FetchDecision::Bypass(BypassReason::Malformed);
            }
        };
        match self.classifier.classify(&request) {
            Classification::Bypass(reason) => FetchDecision::Bypass(reason),
            Classification::Intercept(route) => {
                FetchDecision::Respond(self.engine.execute(&request, &route).await)
            }
        }
    }

    async fn connectivity_changed(&self, online: bool) -> bool {
        if !online {
            broadcast(
                self.clients.as_ref(),
                &BroadcastMessage::NetworkStatus { online: false },
            )
            .await;
            return false;
        }
        let sync = self.sync.clone();
        self.tasks.extend("connectivity-replay", async move {
            sync.connectivity_restored().await;
        })
    }

    /// Answer a control message.
    pub async fn handle_message(&self, message: &JsonValue) -> ControlReply {
        let Some(message) = ControlMessage::parse(message) else {
            debug!(message = %message, "Unknown control message");
            return ControlReply::unknown();
        };
        debug!(message = ?message, "Control message");

        match message {
            ControlMessage::GetVersion => ControlReply::Version {
                version: self.config.version.clone(),
            },
            ControlMessage::ClearCache { name } => ControlReply::Cleared {
                cleared: self.clear_partitions(name).await,
            },
            ControlMessage::UpdateCache => {
                let report = self.lifecycle.precache(true).await;
                ControlReply::Updated {
                    updated: report.stored,
                    failed: report.failures.len(),
                }
            }
            ControlMessage::GetCacheStatus => ControlReply::Status {
                version: self.config.version.clone(),
                partitions: self.partition_status().await,
            },
            ControlMessage::KeepAlive => {
                debug!("Keep alive received");
                ControlReply::Alive { alive: true }
            }
        }
    }

    async fn clear_partitions(&self, name: Option<String>) -> Vec<String> {
        let targets = match name {
            Some(name) => vec![name],
            None => match self.store.partition_names().await {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = %e, "Could not list partitions to clear");
                    return Vec::new();
                }
            },
        };

        let mut cleared = Vec::new();
        for name in targets {
            match self.store.delete_partition(&name).await {
                Ok(true) => cleared.push(name),
                Ok(false) => debug!(partition = %name, "Nothing to clear"),
                Err(e) => warn!(partition = %name, error = %e, "Could not clear partition"),
            }
        }
        cleared.sort();
        info!(cleared = ?cleared, "Partitions cleared");
        cleared
    }

    async fn partition_status(&self) -> Vec<PartitionStatus> {
        let mut names = match self.store.partition_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list partitions");
                return Vec::new();
            }
        };
        names.sort();

        let mut status = Vec::with_capacity(names.len());
        for name in names {
            let entries = match self.store.list_keys(&name).await {
                Ok(keys) => keys.len(),
                Err(e) => {
                    warn!(partition = %name, error = %e, "Could not count entries");
                    0
                }
            };
            status.push(PartitionStatus { name, entries });
        }
        status
    }
}
