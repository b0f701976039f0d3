//! A wired-up worker over fake capabilities.

use std::sync::Arc;

use url::Url;
use zewed_common::ManualClock;
use zewed_sw::{
    CacheConfig, Capabilities, EventOutcome, FetchDecision, IncomingRequest, PartitionConfig,
    PartitionRole, Registration, Response, ServiceWorker, SharedRegistration, WorkerEvent,
};
use zewed_sync::SyncQueue;

use crate::fakes::{FailingStore, MockNetwork, RecordingClients, RecordingDisplay};

/// Origin every test configuration is served from.
pub const ORIGIN: &str = "https://zewedjobs.test";

/// 2026-01-01T00:00:00Z.
pub const START_MILLIS: i64 = 1_767_225_600_000;

/// Absolute URL for a path on [`ORIGIN`].
pub fn url(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

/// Font stylesheet precached from a CDN.
pub const FONT_CSS: &str = "https://fonts.googleapis.com/css2?family=Inter";

/// A small configuration for `version` on [`ORIGIN`].
pub fn test_config(version: &str) -> CacheConfig {
    let origin = Url::parse(ORIGIN).expect("test origin parses");
    CacheConfig {
        version: version.to_string(),
        app_origin: origin,
        app_root: "/".to_string(),
        partitions: vec![
            PartitionConfig {
                name: format!("static-{version}"),
                role: PartitionRole::Static,
                precache: [
                    "/",
                    "/offline.html",
                    "/assets/css/style.min.css",
                    "/assets/js/main.min.js",
                    "/assets/images/placeholder.png",
                    FONT_CSS,
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                critical: true,
                max_age_secs: None,
            },
            PartitionConfig {
                name: format!("api-{version}"),
                role: PartitionRole::Api,
                precache: Vec::new(),
                critical: false,
                max_age_secs: Some(300),
            },
        ],
        ..CacheConfig::default()
    }
}

/// Fake capabilities shared by the workers of one test.
pub struct TestWorld {
    pub store: Arc<FailingStore>,
    pub network: Arc<MockNetwork>,
    pub clients: Arc<RecordingClients>,
    pub display: Arc<RecordingDisplay>,
    pub queue: SyncQueue,
    pub clock: Arc<ManualClock>,
    pub registration: SharedRegistration,
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_store(FailingStore::new())
    }

    pub fn with_store(store: FailingStore) -> Self {
        let clock = Arc::new(ManualClock::from_millis(START_MILLIS));
        let queue = SyncQueue::open_in_memory(clock.clone()).expect("in-memory queue opens");
        Self {
            store: Arc::new(store),
            network: Arc::new(MockNetwork::new()),
            clients: Arc::new(RecordingClients::new()),
            display: Arc::new(RecordingDisplay::new()),
            queue,
            clock,
            registration: Registration::shared(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            store: self.store.clone(),
            network: self.network.clone(),
            clients: self.clients.clone(),
            display: self.display.clone(),
            queue: self.queue.clone(),
            clock: self.clock.clone(),
            registration: self.registration.clone(),
        }
    }

    /// A worker for `config`, not yet installed.
    pub fn worker(&self, config: CacheConfig) -> ServiceWorker {
        ServiceWorker::new(config, self.capabilities()).expect("test config is valid")
    }

    /// Script a `200` for every precache URL, with the URL as the body.
    pub fn serve_precache(&self, config: &CacheConfig) {
        for partition in &config.partitions {
            for entry in &partition.precache {
                let absolute = config.resolve(entry).expect("precache URL resolves");
                self.network.respond(
                    absolute.as_str(),
                    Response::new(200, format!("precached {absolute}")),
                );
            }
        }
    }

    /// Install and activate a worker for `config`.
    pub async fn active_worker(&self, config: CacheConfig) -> ServiceWorker {
        self.serve_precache(&config);
        let worker = self.worker(config);
        match worker.dispatch(WorkerEvent::Install).await {
            EventOutcome::Installed {
                install: Ok(_),
                activation: Some(Ok(_)),
            } => {}
            other => panic!("install failed: {other:?}"),
        }
        worker
    }

    /// Fetch through `worker`, expecting the request to be intercepted.
    pub async fn fetch(&self, worker: &ServiceWorker, request: IncomingRequest) -> Response {
        match worker.handle_fetch(&request).await {
            FetchDecision::Respond(response) => response,
            FetchDecision::Bypass(reason) => panic!("{} was bypassed: {reason:?}", request.url),
        }
    }

    /// GET a path on [`ORIGIN`] through `worker`.
    pub async fn get(&self, worker: &ServiceWorker, path: &str) -> Response {
        self.fetch(worker, IncomingRequest::get(url(path))).await
    }
}
