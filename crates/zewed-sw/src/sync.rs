//! Background sync coordination.
//!
//! Replays queued user actions when connectivity returns and refreshes the
//! job feed on the periodic trigger.

use std::sync::Arc;

use hashbrown::HashSet;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use url::Url;
use zewed_cache::{CacheKey, PartitionStore};
use zewed_common::Clock;
use zewed_sync::{SyncIntent, SyncQueue, SyncRecord};

use crate::clients::{broadcast, BroadcastMessage, ClientBroadcaster};
use crate::config::{CacheConfig, ConfigError, PartitionRole};
use crate::error::WorkerResult;
use crate::network::{Network, NetworkRequest};
use crate::notify::{Importance, NotificationBridge, PushPayload};

/// Replays every intent.
pub const TAG_SYNC_JOBS: &str = "sync-jobs";
/// Replays queued applications.
pub const TAG_SYNC_APPLICATIONS: &str = "sync-applications";
/// Replays queued favorites.
pub const TAG_SYNC_FAVORITES: &str = "sync-favorites";
/// Periodic job feed refresh.
pub const TAG_UPDATE_JOBS: &str = "update-jobs";

/// What a sync tag asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Replay queued records for these intents.
    Replay(Vec<SyncIntent>),
    /// Refresh the job feed.
    RefreshJobs,
}

impl SyncTrigger {
    /// Map a tag onto a trigger. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            TAG_SYNC_JOBS => Some(Self::Replay(SyncIntent::ALL.to_vec())),
            TAG_SYNC_APPLICATIONS => Some(Self::Replay(vec![SyncIntent::ApplicationSubmit])),
            TAG_SYNC_FAVORITES => Some(Self::Replay(vec![SyncIntent::FavoriteToggle])),
            TAG_UPDATE_JOBS => Some(Self::RefreshJobs),
            _ => None,
        }
    }
}

/// Outcome of a replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records confirmed by the server.
    pub submitted: Vec<i64>,
    /// Records the server rejected; marked failed, retried next time.
    pub rejected: Vec<i64>,
    /// Records left pending after a transport failure.
    pub deferred: Vec<i64>,
    /// Queue errors that interrupted the pass.
    pub errors: Vec<String>,
}

impl ReplayReport {
    fn merge(&mut self, other: ReplayReport) {
        self.submitted.extend(other.submitted);
        self.rejected.extend(other.rejected);
        self.deferred.extend(other.deferred);
        self.errors.extend(other.errors);
    }

    /// Records attempted in this pass.
    pub fn attempted(&self) -> usize {
        self.submitted.len() + self.rejected.len() + self.deferred.len()
    }
}

/// Outcome of a periodic refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// The feed was fetched and stored.
    pub feed_updated: bool,
    /// Ids not present in the previous feed.
    pub new_jobs: Vec<String>,
    /// A new-jobs notification was shown.
    pub notified: bool,
    /// Expired entries removed from the api partition.
    pub expired: usize,
    /// Submitted records purged from the queue.
    pub purged: usize,
}

/// Result of handling a sync tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Replayed(ReplayReport),
    Refreshed(RefreshReport),
    Ignored(String),
}

/// A job in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(deserialize_with = "job_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

fn job_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid job id {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct JobFeed {
    #[serde(default)]
    jobs: Vec<JobSummary>,
}

/// Replays queued records and refreshes the job feed.
#[derive(Clone)]
pub struct SyncCoordinator {
    config: Arc<CacheConfig>,
    queue: SyncQueue,
    network: Arc<dyn Network>,
    store: Arc<dyn PartitionStore>,
    clients: Arc<dyn ClientBroadcaster>,
    bridge: NotificationBridge,
    clock: Arc<dyn Clock>,
}

impl SyncCoordinator {
    pub fn new(
        config: Arc<CacheConfig>,
        queue: SyncQueue,
        network: Arc<dyn Network>,
        store: Arc<dyn PartitionStore>,
        clients: Arc<dyn ClientBroadcaster>,
        bridge: NotificationBridge,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            queue,
            network,
            store,
            clients,
            bridge,
            clock,
        }
    }

    /// The durable queue.
    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Queue a user action for later replay.
    pub async fn enqueue(
        &self,
        intent: SyncIntent,
        payload: JsonValue,
    ) -> WorkerResult<SyncRecord> {
        let record = self.queue.enqueue(intent, payload).await?;
        debug!(id = record.id, intent = %intent, "Queued for sync");
        Ok(record)
    }

    /// Handle a sync tag.
    pub async fn handle_tag(&self, tag: &str) -> SyncOutcome {
        match SyncTrigger::from_tag(tag) {
            Some(SyncTrigger::Replay(intents)) => {
                SyncOutcome::Replayed(self.replay(&intents).await)
            }
            Some(SyncTrigger::RefreshJobs) => SyncOutcome::Refreshed(self.refresh_jobs().await),
            None => {
                warn!(tag, "Ignoring unknown sync tag");
                SyncOutcome::Ignored(tag.to_string())
            }
        }
    }

    /// Connectivity came back: tell pages and replay everything.
    pub async fn connectivity_restored(&self) -> ReplayReport {
        broadcast(
            self.clients.as_ref(),
            &BroadcastMessage::NetworkStatus { online: true },
        )
        .await;
        self.replay(&SyncIntent::ALL).await
    }

    /// Replay queued records for each intent, in insertion order.
    pub async fn replay(&self, intents: &[SyncIntent]) -> ReplayReport {
        let mut report = ReplayReport::default();
        for intent in intents {
            report.merge(self.replay_intent(*intent).await);
        }
        info!(
            submitted = report.submitted.len(),
            rejected = report.rejected.len(),
            deferred = report.deferred.len(),
            "Sync replay finished"
        );
        report
    }

    async fn replay_intent(&self, intent: SyncIntent) -> ReplayReport {
        let mut report = ReplayReport::default();

        let endpoint = match self.config.endpoint_for(intent) {
            Ok(url) => url,
            Err(e) => {
                warn!(intent = %intent, error = %e, "No replay endpoint");
                report.errors.push(e.to_string());
                return report;
            }
        };
        let records = match self.queue.replayable(intent).await {
            Ok(records) => records,
            Err(e) => {
                warn!(intent = %intent, error = %e, "Could not load queued records");
                report.errors.push(e.to_string());
                return report;
            }
        };

        for record in records {
            self.replay_record(&record, &endpoint, &mut report).await;
        }
        report
    }

    async fn replay_record(&self, record: &SyncRecord, endpoint: &Url, report: &mut ReplayReport) {
        let request = match NetworkRequest::post_json(endpoint.clone(), &record.payload)
            .and_then(|r| r.header("idempotency-key", &format!("sync-{}", record.id)))
        {
            Ok(request) => request,
            Err(e) => {
                warn!(id = record.id, error = %e, "Could not build replay request");
                report.errors.push(e.to_string());
                return;
            }
        };

        let marked = match self.network.fetch(request).await {
            Ok(response) if (200..300).contains(&response.status) => {
                report.submitted.push(record.id);
                self.queue.mark_submitted(record.id).await
            }
            Ok(response) => {
                debug!(id = record.id, status = response.status, "Replay rejected");
                report.rejected.push(record.id);
                self.queue.mark_failed(record.id).await
            }
            Err(e) => {
                debug!(id = record.id, error = %e, "Replay deferred");
                report.deferred.push(record.id);
                return;
            }
        };
        if let Err(e) = marked {
            warn!(id = record.id, error = %e, "Could not record replay result");
            report.errors.push(e.to_string());
        }
    }

    /// Fetch the job feed, notify about new jobs, then tidy up.
    pub async fn refresh_jobs(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        match self.refresh_feed().await {
            Ok(Some(new_jobs)) => {
                report.feed_updated = true;
                if !new_jobs.is_empty() {
                    report.notified = self.notify_new_jobs(&new_jobs).await;
                }
                report.new_jobs = new_jobs.into_iter().map(|j| j.id).collect();
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Job feed refresh failed"),
        }

        // An unreplaced feed is the only baseline for spotting new jobs.
        let keep = if report.feed_updated {
            None
        } else {
            self.feed_key().ok()
        };
        report.expired = self.expire_api_entries(keep.as_ref()).await;
        report.purged = self.purge_submitted().await;
        info!(
            new_jobs = report.new_jobs.len(),
            expired = report.expired,
            purged = report.purged,
            "Job listings refreshed"
        );
        report
    }

    /// Returns the jobs missing from the previous feed, or `None` when the
    /// feed could not be fetched.
    async fn refresh_feed(&self) -> Result<Option<Vec<JobSummary>>, ConfigError> {
        let feed_url = self.config.resolve(&self.config.sync.jobs_feed)?;
        let Some(partition) = self.config.partition(PartitionRole::Api) else {
            return Ok(None);
        };
        let key = CacheKey::get(&feed_url);

        let response = match self.network.fetch(NetworkRequest::get(feed_url.clone())).await {
            Ok(response) if response.is_cacheable() => response,
            Ok(response) => {
                debug!(status = response.status, "Job feed not refreshed");
                return Ok(None);
            }
            Err(e) => {
                debug!(error = %e, "Job feed unreachable");
                return Ok(None);
            }
        };
        let current: JobFeed = match response.json() {
            Ok(feed) => feed,
            Err(e) => {
                warn!(error = %e, "Job feed is not valid JSON");
                return Ok(None);
            }
        };

        let previous = match self.store.get(&partition.name, &key).await {
            Ok(record) => record.and_then(|r| serde_json::from_slice::<JobFeed>(&r.body).ok()),
            Err(e) => {
                warn!(error = %e, "Could not read cached job feed");
                None
            }
        };

        let record = response
            .to_stored()
            .stamp(self.clock.now_millis(), partition.max_age_millis());
        if let Err(e) = self.store.put(&partition.name, &key, record).await {
            warn!(error = %e, "Could not store job feed");
        }

        // The first feed seen is the baseline; nothing is new yet.
        let Some(previous) = previous else {
            return Ok(Some(Vec::new()));
        };
        let known: HashSet<&str> = previous.jobs.iter().map(|j| j.id.as_str()).collect();
        let new_jobs = current
            .jobs
            .iter()
            .filter(|j| !known.contains(j.id.as_str()))
            .cloned()
            .collect();
        Ok(Some(new_jobs))
    }

    async fn notify_new_jobs(&self, jobs: &[JobSummary]) -> bool {
        let payload = match jobs {
            [job] => PushPayload {
                title: job.title.clone().or_else(|| Some("New job posted".to_string())),
                body: Some(match &job.company {
                    Some(company) => format!("{company} is hiring on ZewedJobs"),
                    None => "A new job matches your interests".to_string(),
                }),
                url: Some(format!("/jobs/{}", job.id)),
                id: Some(job.id.clone()),
                importance: Importance::Normal,
            },
            _ => PushPayload {
                title: Some(format!("{} new jobs on ZewedJobs", jobs.len())),
                body: Some("Fresh listings are waiting for you".to_string()),
                url: Some(self.config.app_root.clone()),
                id: Some("new-jobs".to_string()),
                importance: Importance::Normal,
            },
        };
        let shown = match jobs {
            [_] => self.bridge.show(&payload).await,
            _ => self.bridge.show_notice(&payload).await,
        };
        match shown {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Could not show new jobs notification");
                false
            }
        }
    }

    fn feed_key(&self) -> Result<CacheKey, ConfigError> {
        Ok(CacheKey::get(&self.config.resolve(&self.config.sync.jobs_feed)?))
    }

    /// Delete api entries whose expiry stamp has passed, except `keep`.
    async fn expire_api_entries(&self, keep: Option<&CacheKey>) -> usize {
        let Some(partition) = self.config.partition(PartitionRole::Api) else {
            return 0;
        };
        let now = self.clock.now_millis();
        let keys = match self.store.list_keys(&partition.name).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(partition = %partition.name, error = %e, "Could not list keys for expiry");
                return 0;
            }
        };

        let mut expired = 0;
        for key in keys {
            if keep == Some(&key) {
                continue;
            }
            let record = match self.store.get(&partition.name, &key).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Could not read entry for expiry");
                    continue;
                }
            };
            if !record.is_expired(now) {
                continue;
            }
            match self.store.delete(&partition.name, &key).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => warn!(key = %key, error = %e, "Could not delete expired entry"),
            }
        }
        if expired > 0 {
            debug!(partition = %partition.name, expired, "Expired api entries removed");
        }
        expired
    }

    /// Drop submitted records older than the retention window.
    pub async fn purge_submitted(&self) -> usize {
        let retention =
            i64::try_from(self.config.sync.retention_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let cutoff = self.clock.now_millis().saturating_sub(retention);
        match self.queue.purge_submitted_before(cutoff).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(error = %e, "Could not purge submitted records");
                0
            }
        }
    }
}
