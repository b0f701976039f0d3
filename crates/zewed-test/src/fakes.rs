//! Fake capabilities.
//!
//! Each fake records what the worker asked of it so tests can assert on side
//! effects (requests issued, messages broadcast, notifications shown).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;
use zewed_cache::{
    CacheKey, MemoryPartitionStore, PartitionStore, StorageError, StorageResult, StoredResponse,
};
use zewed_sw::{
    BroadcastMessage, ClientBroadcaster, ClientError, ClientInfo, DisplayError, DisplayRequest,
    Network, NetworkError, NetworkRequest, NotificationDisplay, Response,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One scripted network reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    Fail,
}

/// A request the fake network saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RecordedRequest {
    /// Header value, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

#[derive(Default)]
struct Route {
    once: VecDeque<Reply>,
    sticky: Option<Reply>,
}

/// Scripted network.
///
/// URLs answer with their scripted reply: one-shot replies first, then the
/// sticky one. Unscripted URLs answer `404`. While offline, every request
/// fails at the transport level.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    offline: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `url` with `response` until told otherwise.
    pub fn respond(&self, url: &str, response: Response) {
        lock(&self.routes).entry(url.to_string()).or_default().sticky =
            Some(Reply::Respond(response));
    }

    /// Answer `url` with a text body.
    pub fn respond_text(&self, url: &str, status: u16, body: &str) {
        self.respond(url, Response::new(status, body.to_string()));
    }

    /// Answer `url` with a JSON body.
    pub fn respond_json(&self, url: &str, status: u16, body: &serde_json::Value) {
        self.respond(
            url,
            Response::new(status, body.to_string()).with_header("content-type", "application/json"),
        );
    }

    /// Fail `url` at the transport level until told otherwise.
    pub fn fail(&self, url: &str) {
        lock(&self.routes).entry(url.to_string()).or_default().sticky = Some(Reply::Fail);
    }

    /// Queue a one-shot reply for `url`.
    pub fn push_reply(&self, url: &str, reply: Reply) {
        lock(&self.routes)
            .entry(url.to_string())
            .or_default()
            .once
            .push_back(reply);
    }

    /// Take the whole network down or bring it back.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Requests issued to `url`.
    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }

    /// Number of requests issued to `url`.
    pub fn hits(&self, url: &str) -> usize {
        self.requests_to(url).len()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: NetworkRequest) -> Result<Response, NetworkError> {
        let url = request.url.to_string();
        lock(&self.requests).push(RecordedRequest {
            method: request.method.to_string(),
            url: url.clone(),
            headers: request
                .headers
                .iter()
                .filter_map(|(n, v)| Some((n.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body: request.body.as_ref().map(|b| b.to_vec()),
        });
        // Suspend once so concurrent callers interleave the way real I/O would.
        tokio::task::yield_now().await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Unavailable("offline".into()));
        }

        let reply = {
            let mut routes = lock(&self.routes);
            match routes.get_mut(&url) {
                Some(route) => route.once.pop_front().or_else(|| route.sticky.clone()),
                None => None,
            }
        };
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail) => Err(NetworkError::Unavailable(format!("{url} unreachable"))),
            None => Ok(Response::new(404, "not found")),
        }
    }
}

/// Client capability that records every call.
#[derive(Default)]
pub struct RecordingClients {
    clients: Mutex<Vec<ClientInfo>>,
    messages: Mutex<Vec<(String, BroadcastMessage)>>,
    focused: Mutex<Vec<String>>,
    opened: Mutex<Vec<Url>>,
    claims: AtomicUsize,
    next_id: AtomicUsize,
    unavailable: AtomicBool,
}

impl RecordingClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open window.
    pub fn add_window(&self, url: &str) -> String {
        let id = format!("client-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        if let Ok(url) = Url::parse(url) {
            lock(&self.clients).push(ClientInfo::window(id.clone(), url));
        }
        id
    }

    /// Make every call fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<(String, BroadcastMessage)> {
        lock(&self.messages).clone()
    }

    pub fn focused(&self) -> Vec<String> {
        lock(&self.focused).clone()
    }

    pub fn opened(&self) -> Vec<Url> {
        lock(&self.opened).clone()
    }

    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ClientError::Unavailable("clients unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ClientBroadcaster for RecordingClients {
    async fn clients(&self) -> Result<Vec<ClientInfo>, ClientError> {
        self.check()?;
        Ok(lock(&self.clients).clone())
    }

    async fn claim(&self) -> Result<(), ClientError> {
        self.check()?;
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn post_message(
        &self,
        client_id: &str,
        message: &BroadcastMessage,
    ) -> Result<(), ClientError> {
        self.check()?;
        if !lock(&self.clients).iter().any(|c| c.id == client_id) {
            return Err(ClientError::NotFound(client_id.to_string()));
        }
        lock(&self.messages).push((client_id.to_string(), message.clone()));
        Ok(())
    }

    async fn focus(&self, client_id: &str) -> Result<(), ClientError> {
        self.check()?;
        lock(&self.focused).push(client_id.to_string());
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<Option<ClientInfo>, ClientError> {
        self.check()?;
        lock(&self.opened).push(url.clone());
        let id = self.add_window(url.as_str());
        Ok(lock(&self.clients).iter().find(|c| c.id == id).cloned())
    }
}

/// Notification display that records every request.
#[derive(Default)]
pub struct RecordingDisplay {
    shown: Mutex<Vec<DisplayRequest>>,
    denied: AtomicBool,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<DisplayRequest> {
        lock(&self.shown).clone()
    }

    /// Refuse to show anything.
    pub fn deny(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationDisplay for RecordingDisplay {
    async fn show(&self, request: DisplayRequest) -> Result<(), DisplayError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(DisplayError::PermissionDenied);
        }
        lock(&self.shown).push(request);
        Ok(())
    }
}

/// In-memory store whose operations can be made to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryPartitionStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a store, e.g. one with a quota.
    pub fn wrapping(inner: MemoryPartitionStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Successful `put` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The wrapped store, bypassing failure injection.
    pub fn inner(&self) -> &MemoryPartitionStore {
        &self.inner
    }

    fn unavailable(flag: &AtomicBool) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PartitionStore for FailingStore {
    async fn open(&self, name: &str) -> StorageResult<()> {
        Self::unavailable(&self.fail_writes)?;
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> StorageResult<bool> {
        Self::unavailable(&self.fail_reads)?;
        self.inner.has(name).await
    }

    async fn partition_names(&self) -> StorageResult<Vec<String>> {
        Self::unavailable(&self.fail_reads)?;
        self.inner.partition_names().await
    }

    async fn get(&self, partition: &str, key: &CacheKey) -> StorageResult<Option<StoredResponse>> {
        Self::unavailable(&self.fail_reads)?;
        self.inner.get(partition, key).await
    }

    async fn put(
        &self,
        partition: &str,
        key: &CacheKey,
        record: StoredResponse,
    ) -> StorageResult<()> {
        Self::unavailable(&self.fail_writes)?;
        self.inner.put(partition, key, record).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &CacheKey) -> StorageResult<bool> {
        Self::unavailable(&self.fail_deletes)?;
        self.inner.delete(partition, key).await
    }

    async fn list_keys(&self, partition: &str) -> StorageResult<Vec<CacheKey>> {
        Self::unavailable(&self.fail_reads)?;
        self.inner.list_keys(partition).await
    }

    async fn delete_partition(&self, name: &str) -> StorageResult<bool> {
        Self::unavailable(&self.fail_deletes)?;
        self.inner.delete_partition(name).await
    }
}
