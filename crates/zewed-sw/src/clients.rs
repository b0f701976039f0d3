//! Open application pages and messages sent to them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Client capability errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Client not found: {0}")]
    NotFound(String),

    #[error("Client unavailable: {0}")]
    Unavailable(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A page the worker can reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub url: Url,
    #[serde(default)]
    pub client_type: ClientType,
    #[serde(default)]
    pub focused: bool,
}

impl ClientInfo {
    /// A window client.
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            focused: false,
        }
    }
}

/// Messages broadcast to open pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastMessage {
    /// A new version took control.
    VersionActivated { version: String },
    /// Connectivity changed.
    NetworkStatus { online: bool },
}

/// Access to open pages (the worker's `clients` global).
#[async_trait]
pub trait ClientBroadcaster: Send + Sync {
    /// Pages currently open, controlled or not.
    async fn clients(&self) -> Result<Vec<ClientInfo>, ClientError>;

    /// Take control of every open page.
    async fn claim(&self) -> Result<(), ClientError>;

    /// Send a message to one page.
    async fn post_message(
        &self,
        client_id: &str,
        message: &BroadcastMessage,
    ) -> Result<(), ClientError>;

    /// Bring a window to the foreground.
    async fn focus(&self, client_id: &str) -> Result<(), ClientError>;

    /// Open a new window.
    async fn open_window(&self, url: &Url) -> Result<Option<ClientInfo>, ClientError>;
}

/// Post `message` to every open page. Returns how many received it.
pub async fn broadcast(clients: &dyn ClientBroadcaster, message: &BroadcastMessage) -> usize {
    let targets = match clients.clients().await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(error = %e, "Could not enumerate clients");
            return 0;
        }
    };

    let mut delivered = 0;
    for client in &targets {
        match clients.post_message(&client.id, message).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(client = %client.id, error = %e, "Broadcast failed"),
        }
    }
    debug!(message = ?message, delivered, total = targets.len(), "Broadcast sent");
    delivered
}
