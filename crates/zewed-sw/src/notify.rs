//! Notification bridge.
//!
//! Turns push payloads into display requests and routes interactions with the
//! shown notification.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;
use zewed_sync::{SyncIntent, SyncQueue};

use crate::clients::{ClientBroadcaster, ClientType};
use crate::config::CacheConfig;
use crate::error::WorkerResult;

/// Notification display errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Display unavailable: {0}")]
    Unavailable(String),
}

/// How urgently a notification should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    High,
    #[default]
    #[serde(other)]
    Normal,
}

/// Inbound push payload. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    #[serde(deserialize_with = "optional_id")]
    pub id: Option<String>,
    pub importance: Importance,
}

impl PushPayload {
    /// Parse raw push bytes. Absent or malformed payloads yield the defaults.
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }
        match serde_json::from_slice(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Malformed push payload, using defaults");
                Self::default()
            }
        }
    }
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        Some(JsonValue::String(s)) if !s.is_empty() => Some(s),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// An action button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

impl NotificationAction {
    fn new(action: &str, title: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
        }
    }
}

pub const ACTION_VIEW: &str = "view";
pub const ACTION_SAVE: &str = "save";
pub const ACTION_DISMISS: &str = "dismiss";

/// Data attached to a shown notification and handed back on interaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationData {
    pub url: String,
    /// Notification tag.
    pub id: Option<String>,
    /// The job the notification is about, if any. Only these can be saved.
    pub job_id: Option<String>,
}

/// A request to show a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayRequest {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: Option<String>,
    pub require_interaction: bool,
    pub silent: bool,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// Shows notifications.
#[async_trait]
pub trait NotificationDisplay: Send + Sync {
    async fn show(&self, request: DisplayRequest) -> Result<(), DisplayError>;
}

/// What a notification interaction led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// A new window was opened at the URL.
    Opened(Url),
    /// An existing window was focused.
    Focused(String),
    /// A favorite-toggle was queued.
    Saved { record_id: i64 },
    /// The notification was dismissed.
    Dismissed,
    /// Nothing could be done.
    Ignored,
}

/// Converts payloads into display requests and routes interactions.
#[derive(Clone)]
pub struct NotificationBridge {
    config: Arc<CacheConfig>,
    display: Arc<dyn NotificationDisplay>,
    clients: Arc<dyn ClientBroadcaster>,
    queue: SyncQueue,
}

impl NotificationBridge {
    pub fn new(
        config: Arc<CacheConfig>,
        display: Arc<dyn NotificationDisplay>,
        clients: Arc<dyn ClientBroadcaster>,
        queue: SyncQueue,
    ) -> Self {
        Self {
            config,
            display,
            clients,
            queue,
        }
    }

    /// Build the display request for a pushed payload, whose id names a job.
    pub fn display_request(&self, payload: &PushPayload) -> DisplayRequest {
        self.build_request(payload, payload.id.clone())
    }

    fn build_request(&self, payload: &PushPayload, job_id: Option<String>) -> DisplayRequest {
        let defaults = &self.config.notifications;
        let url = match (&payload.url, &payload.id) {
            (Some(url), _) if !url.is_empty() => url.clone(),
            (_, Some(id)) => job_path(id),
            _ => self.config.app_root.clone(),
        };

        DisplayRequest {
            title: payload
                .title
                .clone()
                .unwrap_or_else(|| defaults.default_title.clone()),
            body: payload
                .body
                .clone()
                .unwrap_or_else(|| defaults.default_body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            vibrate: defaults.vibrate.clone(),
            tag: payload.id.clone(),
            require_interaction: payload.importance == Importance::High,
            silent: payload.importance == Importance::Low,
            actions: actions(job_id.is_some()),
            data: NotificationData {
                url,
                id: payload.id.clone(),
                job_id,
            },
        }
    }

    /// Show a notification for raw push bytes.
    pub async fn handle_push(&self, bytes: &[u8]) -> WorkerResult<DisplayRequest> {
        self.show(&PushPayload::parse(bytes)).await
    }

    /// Show a notification for a payload.
    pub async fn show(&self, payload: &PushPayload) -> WorkerResult<DisplayRequest> {
        self.present(self.display_request(payload)).await
    }

    /// Show a notification that is not about a single job.
    pub async fn show_notice(&self, payload: &PushPayload) -> WorkerResult<DisplayRequest> {
        self.present(self.build_request(payload, None)).await
    }

    async fn present(&self, request: DisplayRequest) -> WorkerResult<DisplayRequest> {
        debug!(title = %request.title, tag = ?request.tag, "Showing notification");
        self.display.show(request.clone()).await?;
        Ok(request)
    }

    /// Route an interaction with a shown notification.
    pub async fn handle_click(
        &self,
        action: Option<&str>,
        data: &NotificationData,
    ) -> WorkerResult<ClickOutcome> {
        debug!(
            action = ?action,
            id = ?data.id,
            job_id = ?data.job_id,
            "Notification interaction"
        );
        match action {
            Some(ACTION_VIEW) => {
                let target = if !data.url.is_empty() {
                    data.url.clone()
                } else if let Some(job_id) = &data.job_id {
                    job_path(job_id)
                } else {
                    self.config.app_root.clone()
                };
                self.open(&self.config.resolve(&target)?).await
            }
            Some(ACTION_SAVE) => self.save(data).await,
            Some(ACTION_DISMISS) => Ok(ClickOutcome::Dismissed),
            _ => self.focus_or_open().await,
        }
    }

    async fn save(&self, data: &NotificationData) -> WorkerResult<ClickOutcome> {
        let Some(id) = &data.job_id else {
            warn!("Save requested on a notification without a job id");
            return Ok(ClickOutcome::Ignored);
        };

        let record = self
            .queue
            .enqueue(
                SyncIntent::FavoriteToggle,
                serde_json::json!({ "job_id": id, "saved": true }),
            )
            .await?;
        info!(job_id = %id, record = record.id, "Queued favorite from notification");

        let confirmation = PushPayload {
            title: Some("Job saved".to_string()),
            body: Some("We'll sync it to your favorites when you're online.".to_string()),
            url: Some(job_path(id)),
            id: Some(format!("saved-{id}")),
            importance: Importance::Low,
        };
        if let Err(e) = self.show_notice(&confirmation).await {
            warn!(error = %e, "Could not show save confirmation");
        }
        Ok(ClickOutcome::Saved {
            record_id: record.id,
        })
    }

    async fn focus_or_open(&self) -> WorkerResult<ClickOutcome> {
        let root = self.config.app_root_url()?;
        match self.clients.clients().await {
            Ok(clients) => {
                let candidate = clients.into_iter().find(|c| {
                    c.client_type == ClientType::Window
                        && c.url.origin() == root.origin()
                        && c.url.path().starts_with(root.path())
                });
                if let Some(client) = candidate {
                    match self.clients.focus(&client.id).await {
                        Ok(()) => return Ok(ClickOutcome::Focused(client.id)),
                        Err(e) => warn!(client = %client.id, error = %e, "Focus failed"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not enumerate clients"),
        }
        self.open(&root).await
    }

    async fn open(&self, url: &Url) -> WorkerResult<ClickOutcome> {
        self.clients.open_window(url).await?;
        Ok(ClickOutcome::Opened(url.clone()))
    }
}

fn actions(saveable: bool) -> Vec<NotificationAction> {
    let mut actions = vec![NotificationAction::new(ACTION_VIEW, "View Job")];
    if saveable {
        actions.push(NotificationAction::new(ACTION_SAVE, "Save Job"));
    }
    actions.push(NotificationAction::new(ACTION_DISMISS, "Dismiss"));
    actions
}

fn job_path(id: &str) -> String {
    format!("/jobs/{id}")
}
