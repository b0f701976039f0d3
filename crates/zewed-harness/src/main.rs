//! ZewedJobs worker harness
//!
//! Hosts one worker version against a live origin: installs it, replays the
//! sync queue, then fetches each URL given on the command line and prints how
//! it was answered. Useful for checking a cache configuration before it ships.
//!
//! ```text
//! zewed-harness [--config cache.json] [--queue sync.db] [--log-format json] [URL ...]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use url::Url;
use zewed_cache::MemoryPartitionStore;
use zewed_common::{init_logging, Clock, LogConfig, LogFormat, SystemClock};
use zewed_sw::{
    BroadcastMessage, CacheConfig, Capabilities, ClientBroadcaster, ClientError, ClientInfo,
    DisplayError, DisplayRequest, EventOutcome, FetchDecision, HttpConfig, HttpNetwork,
    IncomingRequest, NotificationDisplay, Registration, ServiceWorker, WorkerEvent,
};
use zewed_sync::SyncQueue;

/// Parse command line arguments
struct Args {
    config: Option<PathBuf>,
    queue: Option<PathBuf>,
    log_format: LogFormat,
    urls: Vec<String>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut queue = None;
        let mut log_format = LogFormat::Compact;
        let mut urls = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => config = args.next().map(PathBuf::from),
                "--queue" => queue = args.next().map(PathBuf::from),
                "--log-format" => {
                    let name = args.next().unwrap_or_default();
                    log_format = LogFormat::parse(&name)
                        .with_context(|| format!("unknown log format {name:?}"))?;
                }
                flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
                _ => urls.push(arg),
            }
        }

        Ok(Self {
            config,
            queue,
            log_format,
            urls,
        })
    }
}

/// Window clients are simulated; every call is logged.
#[derive(Default)]
struct LoggingClients;

#[async_trait]
impl ClientBroadcaster for LoggingClients {
    async fn clients(&self) -> Result<Vec<ClientInfo>, ClientError> {
        Ok(Vec::new())
    }

    async fn claim(&self) -> Result<(), ClientError> {
        info!("Clients claimed");
        Ok(())
    }

    async fn post_message(
        &self,
        client_id: &str,
        message: &BroadcastMessage,
    ) -> Result<(), ClientError> {
        info!(client = %client_id, message = ?message, "Client message");
        Ok(())
    }

    async fn focus(&self, client_id: &str) -> Result<(), ClientError> {
        Err(ClientError::NotFound(client_id.to_string()))
    }

    async fn open_window(&self, url: &Url) -> Result<Option<ClientInfo>, ClientError> {
        info!(url = %url, "Would open window");
        Ok(None)
    }
}

/// Notifications are printed instead of shown.
#[derive(Default)]
struct LoggingDisplay;

#[async_trait]
impl NotificationDisplay for LoggingDisplay {
    async fn show(&self, request: DisplayRequest) -> Result<(), DisplayError> {
        info!(
            title = %request.title,
            body = %request.body,
            url = %request.data.url,
            "Notification"
        );
        Ok(())
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CacheConfig> {
    let config = match path {
        Some(path) => CacheConfig::from_path(path)
            .with_context(|| format!("reading cache config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    config.validate().context("invalid cache config")?;
    Ok(config)
}

fn open_queue(path: Option<&PathBuf>, clock: Arc<dyn Clock>) -> Result<SyncQueue> {
    let queue = match path {
        Some(path) => SyncQueue::open(path, clock)
            .with_context(|| format!("opening sync queue {}", path.display()))?,
        None => SyncQueue::open_in_memory(clock).context("opening in-memory sync queue")?,
    };
    Ok(queue)
}

async fn install(worker: &ServiceWorker) -> Result<()> {
    match worker.dispatch(WorkerEvent::Install).await {
        EventOutcome::Installed {
            install: Ok(report),
            activation,
        } => {
            println!(
                "{}",
                json!({
                    "installed": report.version,
                    "stored": report.precache.stored,
                    "skipped": report.precache.skipped,
                    "optional_failures": report.precache.failures.len(),
                })
            );
            match activation {
                Some(Ok(activation)) => {
                    println!(
                        "{}",
                        json!({
                            "activated": activation.version,
                            "deleted": activation.deleted_partitions,
                        })
                    );
                    Ok(())
                }
                Some(Err(e)) => Err(e).context("activation failed"),
                None => bail!("install finished without activation"),
            }
        }
        EventOutcome::Installed {
            install: Err(e), ..
        } => Err(e).context("install failed"),
        other => bail!("unexpected outcome {other:?}"),
    }
}

async fn fetch(worker: &ServiceWorker, target: &str) {
    let request = IncomingRequest::get(target).accept("text/html,*/*");
    match worker.handle_fetch(&request).await {
        FetchDecision::Respond(response) => println!(
            "{}",
            json!({
                "url": target,
                "status": response.status,
                "source": format!("{:?}", response.source),
                "bytes": response.body.len(),
                "cached": response.header("sw-cached"),
            })
        ),
        FetchDecision::Bypass(reason) => println!(
            "{}",
            json!({ "url": target, "bypass": format!("{reason:?}") })
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;
    init_logging(LogConfig::default().with_format(args.log_format));

    let config = load_config(args.config.as_ref())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = open_queue(args.queue.as_ref(), clock.clone())?;
    let network = HttpNetwork::new(HttpConfig::default()).context("building HTTP client")?;

    let caps = Capabilities {
        store: Arc::new(MemoryPartitionStore::new()),
        network: Arc::new(network),
        clients: Arc::new(LoggingClients),
        display: Arc::new(LoggingDisplay),
        queue,
        clock,
        registration: Registration::shared(),
    };
    let worker = ServiceWorker::new(config, caps).context("creating worker")?;
    info!(version = %worker.version(), origin = %worker.config().app_origin, "Harness starting");

    install(&worker).await?;

    match worker.dispatch(WorkerEvent::Sync("sync-jobs".to_string())).await {
        EventOutcome::Synced(outcome) => info!(outcome = ?outcome, "Queue replayed"),
        other => warn!(outcome = ?other, "Unexpected sync outcome"),
    }

    for target in &args.urls {
        let absolute = match worker.config().resolve(target) {
            Ok(url) => url.to_string(),
            Err(e) => {
                warn!(url = %target, error = %e, "Skipping unresolvable URL");
                continue;
            }
        };
        fetch(&worker, &absolute).await;
    }

    worker.shutdown().await;
    Ok(())
}
