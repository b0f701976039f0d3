//! The network capability and its reqwest implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

use crate::request::{RequestDescriptor, Response};

/// Transport failures. An HTTP error status is not one of these.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Network unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl NetworkRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a POST carrying a JSON body.
    pub fn post_json(url: Url, body: &serde_json::Value) -> Result<Self, NetworkError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: Some(Bytes::from(body)),
        }
        .header("content-type", "application/json")
    }

    /// Forward an intercepted request.
    pub fn from_descriptor(request: &RequestDescriptor) -> Self {
        let mut forwarded = Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: HeaderMap::new(),
            body: None,
        };
        if let Some(accept) = request
            .accept
            .as_deref()
            .and_then(|a| HeaderValue::from_str(a).ok())
        {
            forwarded.headers.insert(http::header::ACCEPT, accept);
        }
        forwarded
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, NetworkError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Issues requests to the network.
///
/// `Ok` means the transport succeeded, whatever the status.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: NetworkRequest) -> Result<Response, NetworkError>;
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ZewedJobs-Worker/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// [`Network`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    /// Build a client.
    pub fn new(config: HttpConfig) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        info!(user_agent = %config.user_agent, "HTTP network initialized");

        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: NetworkRequest) -> Result<Response, NetworkError> {
        debug!(url = %request.url, method = %request.method, "Fetching");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                NetworkError::Unavailable(e.to_string())
            } else {
                NetworkError::Http(e)
            }
        })?;

        let status = response.status();
        let redirected = response.url() != &request.url;
        let mut headers: hashbrown::HashMap<String, String> = hashbrown::HashMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|joined| {
                    joined.push_str(", ");
                    joined.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        let body = response.bytes().await?;

        trace!(
            url = %request.url,
            status = %status,
            redirected,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
            source: crate::request::ResponseSource::Network,
            redirected,
        })
    }
}
