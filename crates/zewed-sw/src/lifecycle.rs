//! Version lifecycle: install, activate, replace.
//!
//! ```text
//! Registration
//!     ├── installing  (Installing)
//!     ├── waiting     (Installed → Activating)
//!     └── active      (Activated → Redundant once replaced)
//! ```
//!
//! A [`Registration`] is shared between the worker versions that take turns
//! controlling the application, so that activating a new version retires the
//! previous one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use zewed_cache::{CacheKey, PartitionStore};

use crate::clients::{broadcast, BroadcastMessage, ClientBroadcaster};
use crate::config::{CacheConfig, PartitionConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::network::{Network, NetworkRequest};

const RETIRED_HISTORY: usize = 16;

/// Identifies one installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionId(u64);

impl VersionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Lifecycle state of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Pre-populating partitions.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Cleaning up and claiming clients.
    Activating,
    /// Serving requests.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One installed (or installing) version.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: VersionId,
    pub version: String,
    pub state: WorkerState,
    pub error: Option<String>,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    fn new(version: &str) -> Self {
        Self {
            id: VersionId::next(),
            version: version.to_string(),
            state: WorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        debug!(
            version = %self.version,
            id = self.id.0,
            from = ?self.state,
            to = ?state,
            "Worker state change"
        );
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }
}

/// Installing, waiting and active versions.
#[derive(Debug, Default)]
pub struct Registration {
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
    /// Most recent redundant versions, oldest first.
    pub retired: Vec<WorkerVersion>,
}

/// Registration shared by successive worker versions.
pub type SharedRegistration = Arc<RwLock<Registration>>;

impl Registration {
    /// Create a shareable registration.
    pub fn shared() -> SharedRegistration {
        Arc::new(RwLock::new(Self::default()))
    }

    fn retire(&mut self, mut version: WorkerVersion) {
        version.set_state(WorkerState::Redundant);
        self.retired.push(version);
        if self.retired.len() > RETIRED_HISTORY {
            self.retired.remove(0);
        }
    }

    /// Start installing `version`. A previous installing version is retired.
    pub fn begin_install(&mut self, version: &str) -> VersionId {
        if let Some(previous) = self.installing.take() {
            self.retire(previous);
        }
        let mut worker = WorkerVersion::new(version);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        id
    }

    /// Move the installing version to waiting. A previous waiting version is retired.
    pub fn install_complete(&mut self, id: VersionId) -> bool {
        match self.installing.take() {
            Some(mut worker) if worker.id == id => {
                worker.set_state(WorkerState::Installed);
                if let Some(previous) = self.waiting.replace(worker) {
                    self.retire(previous);
                }
                true
            }
            other => {
                self.installing = other;
                false
            }
        }
    }

    /// Retire the installing version after a failed install.
    pub fn install_failed(&mut self, id: VersionId, error: &str) {
        match self.installing.take() {
            Some(mut worker) if worker.id == id => {
                worker.error = Some(error.to_string());
                self.retire(worker);
            }
            other => self.installing = other,
        }
    }

    /// Mark the waiting version as activating.
    pub fn begin_activation(&mut self, id: VersionId) -> bool {
        match self.waiting.as_mut() {
            Some(worker) if worker.id == id => {
                worker.set_state(WorkerState::Activating);
                true
            }
            _ => false,
        }
    }

    /// Promote the activating version, retiring the previous active one.
    /// Returns the version string of the replaced version.
    pub fn finish_activation(&mut self, id: VersionId) -> Option<String> {
        let mut worker = match self.waiting.take() {
            Some(worker) if worker.id == id => worker,
            other => {
                self.waiting = other;
                return None;
            }
        };
        worker.set_state(WorkerState::Activated);
        let replaced = self.active.replace(worker);
        replaced.map(|old| {
            let version = old.version.clone();
            self.retire(old);
            version
        })
    }

    /// Retire a version from whichever slot holds it.
    /// Returns `false` when the version is unknown or already retired.
    pub fn retire_version(&mut self, id: VersionId) -> bool {
        let slot = [&mut self.installing, &mut self.waiting, &mut self.active]
            .into_iter()
            .find(|slot| slot.as_ref().is_some_and(|w| w.id == id));
        match slot.and_then(Option::take) {
            Some(worker) => {
                self.retire(worker);
                true
            }
            None => false,
        }
    }

    /// The active version.
    pub fn active(&self) -> Option<&WorkerVersion> {
        self.active.as_ref()
    }

    /// State of a version, if the registration still knows it.
    pub fn state_of(&self, id: VersionId) -> Option<WorkerState> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .chain(self.retired.iter())
            .find(|w| w.id == id)
            .map(|w| w.state)
    }
}

/// Outcome of pre-populating one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryOutcome {
    Stored,
    Skipped,
    Failed(String),
}

/// A precache URL that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheFailure {
    pub partition: String,
    pub url: String,
    pub critical: bool,
    pub reason: String,
}

/// Outcome of a precache pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    pub stored: usize,
    pub skipped: usize,
    pub failures: Vec<PrecacheFailure>,
}

impl PrecacheReport {
    /// Whether a critical partition lost an entry.
    pub fn critical_failed(&self) -> bool {
        self.failures.iter().any(|f| f.critical)
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub version: String,
    pub version_id: VersionId,
    pub precache: PrecacheReport,
    /// Partitions that did not exist before this install.
    pub created_partitions: Vec<String>,
}

/// Outcome of an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub version: String,
    pub deleted_partitions: Vec<String>,
    pub notified_clients: usize,
    /// Version that was active before.
    pub replaced: Option<String>,
}

/// Drives install and activation for one configuration.
pub struct LifecycleManager {
    config: Arc<CacheConfig>,
    store: Arc<dyn PartitionStore>,
    network: Arc<dyn Network>,
    clients: Arc<dyn ClientBroadcaster>,
    registration: SharedRegistration,
    current: AtomicU64,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<CacheConfig>,
        store: Arc<dyn PartitionStore>,
        network: Arc<dyn Network>,
        clients: Arc<dyn ClientBroadcaster>,
        registration: SharedRegistration,
    ) -> Self {
        Self {
            config,
            store,
            network,
            clients,
            registration,
            current: AtomicU64::new(0),
        }
    }

    /// The shared registration.
    pub fn registration(&self) -> &SharedRegistration {
        &self.registration
    }

    fn current_id(&self) -> Option<VersionId> {
        match self.current.load(Ordering::SeqCst) {
            0 => None,
            id => Some(VersionId(id)),
        }
    }

    /// State of this configuration's latest install attempt.
    pub async fn state(&self) -> WorkerState {
        match self.current_id() {
            Some(id) => self
                .registration
                .read()
                .await
                .state_of(id)
                .unwrap_or(WorkerState::Redundant),
            None => WorkerState::Parsed,
        }
    }

    /// Whether this configuration is the active version.
    pub async fn is_serving(&self) -> bool {
        match self.current_id() {
            Some(id) => self
                .registration
                .read()
                .await
                .active()
                .is_some_and(|w| w.id == id && w.is_active()),
            None => false,
        }
    }

    /// Retire this configuration's version on the host's say-so.
    /// Returns `false` when there was nothing left to retire.
    pub async fn make_redundant(&self) -> bool {
        let Some(id) = self.current_id() else {
            return false;
        };
        let retired = self.registration.write().await.retire_version(id);
        if retired {
            info!(version = %self.config.version, "Version made redundant");
        }
        retired
    }

    /// Pre-populate every partition and move to waiting.
    ///
    /// A failure in a critical partition removes the partitions this attempt
    /// created and retires the version; the previous active version is left
    /// untouched.
    pub async fn install(&self) -> WorkerResult<InstallReport> {
        let version = self.config.version.clone();
        let id = self.registration.write().await.begin_install(&version);
        self.current.store(id.0, Ordering::SeqCst);
        info!(version = %version, "Installing");

        let existing = match self.store.partition_names().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list partitions before install");
                Vec::new()
            }
        };
        let created: Vec<String> = self
            .config
            .partitions
            .iter()
            .filter(|p| !existing.contains(&p.name))
            .map(|p| p.name.clone())
            .collect();

        let precache = self.precache(false).await;
        if precache.critical_failed() {
            let failures: Vec<String> = precache
                .failures
                .iter()
                .filter(|f| f.critical)
                .map(|f| format!("{}: {}", f.url, f.reason))
                .collect();
            error!(version = %version, failures = ?failures, "Install failed");

            for name in &created {
                if let Err(e) = self.store.delete_partition(name).await {
                    warn!(
                        partition = %name,
                        error = %e,
                        "Could not remove partition of failed install"
                    );
                }
            }
            self.registration
                .write()
                .await
                .install_failed(id, &failures.join("; "));
            return Err(WorkerError::InstallFailed { version, failures });
        }

        for failure in &precache.failures {
            warn!(
                partition = %failure.partition,
                url = %failure.url,
                reason = %failure.reason,
                "Optional precache entry failed"
            );
        }

        if !self.registration.write().await.install_complete(id) {
            return Err(WorkerError::State(format!(
                "install of {version} was superseded"
            )));
        }
        info!(
            version = %version,
            stored = precache.stored,
            skipped = precache.skipped,
            "Install completed"
        );

        Ok(InstallReport {
            version,
            version_id: id,
            precache,
            created_partitions: created,
        })
    }

    /// Fetch every precache URL in parallel.
    ///
    /// With `overwrite` unset, entries already present are left alone.
    pub async fn precache(&self, overwrite: bool) -> PrecacheReport {
        let mut jobs = Vec::new();
        for partition in &self.config.partitions {
            if let Err(e) = self.store.open(&partition.name).await {
                warn!(partition = %partition.name, error = %e, "Could not open partition");
            }
            for entry in &partition.precache {
                jobs.push(async move {
                    let outcome = self.precache_entry(partition, entry, overwrite).await;
                    (partition, entry, outcome)
                });
            }
        }

        let mut report = PrecacheReport::default();
        for (partition, entry, outcome) in join_all(jobs).await {
            match outcome {
                EntryOutcome::Stored => report.stored += 1,
                EntryOutcome::Skipped => report.skipped += 1,
                EntryOutcome::Failed(reason) => report.failures.push(PrecacheFailure {
                    partition: partition.name.clone(),
                    url: entry.clone(),
                    critical: partition.critical,
                    reason,
                }),
            }
        }
        report
    }

    async fn precache_entry(
        &self,
        partition: &PartitionConfig,
        entry: &str,
        overwrite: bool,
    ) -> EntryOutcome {
        let url = match self.config.resolve(entry) {
            Ok(url) => url,
            Err(e) => return EntryOutcome::Failed(e.to_string()),
        };
        let key = CacheKey::get(&url);

        if !overwrite {
            match self.store.get(&partition.name, &key).await {
                Ok(Some(_)) => return EntryOutcome::Skipped,
                Ok(None) => {}
                Err(e) => debug!(key = %key, error = %e, "Precache lookup failed"),
            }
        }

        let response = match self.network.fetch(NetworkRequest::get(url)).await {
            Ok(response) => response,
            Err(e) => return EntryOutcome::Failed(e.to_string()),
        };
        if response.status != 200 {
            return EntryOutcome::Failed(format!("status {}", response.status));
        }
        match self
            .store
            .put(&partition.name, &key, response.to_stored())
            .await
        {
            Ok(()) => EntryOutcome::Stored,
            Err(e) => EntryOutcome::Failed(e.to_string()),
        }
    }

    /// Clean up old partitions, claim clients and announce the version.
    pub async fn activate(&self) -> WorkerResult<ActivationReport> {
        let id = self.current_id().ok_or(WorkerError::NotActive)?;
        if !self.registration.write().await.begin_activation(id) {
            return Err(WorkerError::State(format!(
                "{} is not waiting to activate",
                self.config.version
            )));
        }
        let version = self.config.version.clone();
        info!(version = %version, "Activating");

        let mut deleted = Vec::new();
        match self.store.partition_names().await {
            Ok(names) => {
                for name in names.into_iter().filter(|n| !self.config.owns_partition(n)) {
                    match self.store.delete_partition(&name).await {
                        Ok(_) => {
                            info!(partition = %name, "Deleted old partition");
                            deleted.push(name);
                        }
                        Err(e) => {
                            warn!(partition = %name, error = %e, "Could not delete old partition")
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not list partitions for cleanup"),
        }

        if let Err(e) = self.clients.claim().await {
            warn!(error = %e, "Could not claim clients");
        }
        let notified = broadcast(
            self.clients.as_ref(),
            &BroadcastMessage::VersionActivated {
                version: version.clone(),
            },
        )
        .await;

        let replaced = self.registration.write().await.finish_activation(id);
        info!(version = %version, replaced = ?replaced, "Activated");

        Ok(ActivationReport {
            version,
            deleted_partitions: deleted,
            notified_clients: notified,
            replaced,
        })
    }
}
