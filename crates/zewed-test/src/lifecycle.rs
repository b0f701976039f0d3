//! # Lifecycle Tests
//!
//! Install, activation and version replacement over a shared registration.

use url::Url;
use zewed_cache::{CacheKey, PartitionStore, StoredResponse};
use zewed_sw::{
    BroadcastMessage, BypassReason, EventOutcome, FetchDecision, IncomingRequest, WorkerError,
    WorkerEvent, WorkerState,
};

use crate::world::{test_config, url, TestWorld};

async fn partitions(world: &TestWorld) -> Vec<String> {
    let mut names = world.store.inner().partition_names().await.unwrap();
    names.sort();
    names
}

async fn snapshot(world: &TestWorld, partition: &str) -> Vec<(CacheKey, Option<StoredResponse>)> {
    let mut keys = world.store.inner().list_keys(partition).await.unwrap();
    keys.sort();
    let mut records = Vec::with_capacity(keys.len());
    for k in keys {
        let record = world.store.inner().get(partition, &k).await.unwrap();
        records.push((k, record));
    }
    records
}

fn key(path: &str) -> CacheKey {
    CacheKey::get(&Url::parse(&url(path)).unwrap())
}

/// Test a fresh install populates every precache entry and activates.
#[tokio::test]
async fn test_install_populates_and_activates() {
    let world = TestWorld::new();
    let config = test_config("v1");
    world.serve_precache(&config);
    let worker = world.worker(config);
    assert_eq!(worker.state().await, WorkerState::Parsed);

    let (install, activation) = match worker.dispatch(WorkerEvent::Install).await {
        EventOutcome::Installed {
            install,
            activation,
        } => (install.unwrap(), activation.unwrap().unwrap()),
        other => panic!("unexpected outcome: {other:?}"),
    };

    assert_eq!(install.precache.stored, 6);
    assert_eq!(install.precache.skipped, 0);
    assert!(install.precache.failures.is_empty());
    assert_eq!(install.created_partitions, ["static-v1", "api-v1"]);
    assert_eq!(activation.replaced, None);
    assert_eq!(worker.state().await, WorkerState::Activated);
    assert_eq!(partitions(&world).await, ["api-v1", "static-v1"]);
    assert_eq!(world.store.inner().list_keys("static-v1").await.unwrap().len(), 6);
}

/// Test precache entries are stored without write stamps.
#[tokio::test]
async fn test_precache_entries_are_unstamped() {
    let world = TestWorld::new();
    world.active_worker(test_config("v1")).await;

    let record = world
        .store
        .inner()
        .get("static-v1", &key("/offline.html"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.cached_at(), None);
    assert_eq!(record.expiry(), None);
}

/// Test installing the same version twice leaves the partitions unchanged.
#[tokio::test]
async fn test_reinstall_is_idempotent() {
    let world = TestWorld::new();
    world.active_worker(test_config("v1")).await;
    let before = snapshot(&world, "static-v1").await;

    world.clock.advance(chrono::Duration::hours(1));
    let again = world.worker(test_config("v1"));
    match again.dispatch(WorkerEvent::Install).await {
        EventOutcome::Installed {
            install: Ok(report),
            activation: Some(Ok(_)),
        } => {
            assert_eq!(report.precache.stored, 0);
            assert_eq!(report.precache.skipped, 6);
            assert!(report.created_partitions.is_empty());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(snapshot(&world, "static-v1").await, before);
    assert_eq!(partitions(&world).await, ["api-v1", "static-v1"]);
}

/// Test activating a new version deletes the previous version's partitions.
#[tokio::test]
async fn test_upgrade_deletes_old_partitions() {
    let world = TestWorld::new();
    let old = world.active_worker(test_config("v2")).await;
    world.network.respond_text(&url("/api/jobs"), 200, "[]");
    world.get(&old, "/api/jobs").await;
    old.settle().await;
    assert_eq!(partitions(&world).await, ["api-v2", "static-v2"]);

    let config = test_config("v3");
    world.serve_precache(&config);
    let new = world.worker(config);
    let activation = match new.dispatch(WorkerEvent::Install).await {
        EventOutcome::Installed {
            install: Ok(_),
            activation: Some(Ok(activation)),
        } => activation,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let mut deleted = activation.deleted_partitions.clone();
    deleted.sort();
    assert_eq!(deleted, ["api-v2", "static-v2"]);
    assert_eq!(activation.replaced.as_deref(), Some("v2"));
    assert_eq!(partitions(&world).await, ["api-v3", "static-v3"]);
}

/// Test the replaced version becomes redundant and stops intercepting.
#[tokio::test]
async fn test_replaced_version_is_redundant() {
    let world = TestWorld::new();
    let old = world.active_worker(test_config("v2")).await;
    let new = world.active_worker(test_config("v3")).await;

    assert_eq!(old.state().await, WorkerState::Redundant);
    assert_eq!(new.state().await, WorkerState::Activated);
    assert_eq!(
        old.handle_fetch(&IncomingRequest::get(url("/"))).await,
        FetchDecision::Bypass(BypassReason::NotActive)
    );
    let response = world.get(&new, "/").await;
    assert_eq!(response.status, 200);
    new.settle().await;
}

/// Test a redundant signal retires the version and stops its background work.
#[tokio::test]
async fn test_redundant_signal_retires_version() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;

    match worker.dispatch(WorkerEvent::Redundant).await {
        EventOutcome::Redundant { retired: true } => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(worker.state().await, WorkerState::Redundant);
    assert!(worker.tasks().is_closed());
    assert_eq!(
        worker.handle_fetch(&IncomingRequest::get(url("/"))).await,
        FetchDecision::Bypass(BypassReason::NotActive)
    );

    match worker.dispatch(WorkerEvent::Redundant).await {
        EventOutcome::Redundant { retired: false } => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// Test a critical precache failure keeps the previous version serving.
#[tokio::test]
async fn test_critical_failure_keeps_previous_version() {
    let world = TestWorld::new();
    let old = world.active_worker(test_config("v2")).await;

    let config = test_config("v3");
    world.serve_precache(&config);
    world.network.fail(&url("/assets/js/main.min.js"));
    let new = world.worker(config);

    match new.dispatch(WorkerEvent::Install).await {
        EventOutcome::Installed {
            install: Err(WorkerError::InstallFailed { version, failures }),
            activation: None,
        } => {
            assert_eq!(version, "v3");
            assert_eq!(failures.len(), 1);
            assert!(failures[0].starts_with("/assets/js/main.min.js"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(new.state().await, WorkerState::Redundant);
    assert_eq!(old.state().await, WorkerState::Activated);
    assert_eq!(partitions(&world).await, ["api-v2", "static-v2"]);

    world.network.set_online(false);
    let response = world.get(&old, "/assets/css/style.min.css").await;
    assert_eq!(response.status, 200);
    assert_eq!(
        new.handle_fetch(&IncomingRequest::get(url("/"))).await,
        FetchDecision::Bypass(BypassReason::NotActive)
    );
    old.settle().await;
}

/// Test a non-200 precache response fails the install.
#[tokio::test]
async fn test_precache_requires_status_200() {
    let world = TestWorld::new();
    let config = test_config("v1");
    world.serve_precache(&config);
    world.network.respond_text(&url("/offline.html"), 404, "gone");
    let worker = world.worker(config);

    match worker.dispatch(WorkerEvent::Install).await {
        EventOutcome::Installed {
            install: Err(err),
            activation: None,
        } => assert_eq!(err.reason().map(|r| r.as_str()), Some("install_failed")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(partitions(&world).await.is_empty());
}

/// Test failures in non-critical partitions are reported but tolerated.
#[tokio::test]
async fn test_optional_precache_failure_is_tolerated() {
    let world = TestWorld::new();
    let mut config = test_config("v1");
    config.partitions[1].precache = vec!["/api/jobs/featured".to_string()];
    world.serve_precache(&config);
    world.network.fail(&url("/api/jobs/featured"));

    let worker = world.worker(config);
    match worker.dispatch(WorkerEvent::Install).await {
        EventOutcome::Installed {
            install: Ok(report),
            activation: Some(Ok(_)),
        } => {
            assert_eq!(report.precache.failures.len(), 1);
            assert_eq!(report.precache.failures[0].partition, "api-v1");
            assert!(!report.precache.critical_failed());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// Test an install can be retried once the network recovers.
#[tokio::test]
async fn test_install_retry_after_failure() {
    let world = TestWorld::new();
    let config = test_config("v1");
    world.serve_precache(&config);
    world.network.fail(&url("/"));

    let first = world.worker(config.clone());
    assert!(matches!(
        first.dispatch(WorkerEvent::Install).await,
        EventOutcome::Installed { install: Err(_), .. }
    ));

    world.serve_precache(&config);
    let second = world.active_worker(config).await;
    assert_eq!(second.state().await, WorkerState::Activated);
    assert_eq!(first.state().await, WorkerState::Redundant);
}

/// Test activation claims clients and announces the version.
#[tokio::test]
async fn test_activation_notifies_clients() {
    let world = TestWorld::new();
    let first = world.clients.add_window(&url("/jobs"));
    let second = world.clients.add_window(&url("/profile"));

    world.active_worker(test_config("v4")).await;

    assert_eq!(world.clients.claims(), 1);
    let messages = world.clients.messages();
    let expected = BroadcastMessage::VersionActivated {
        version: "v4".to_string(),
    };
    assert_eq!(
        messages,
        vec![(first, expected.clone()), (second, expected)]
    );
}

/// Test unavailable clients do not block activation.
#[tokio::test]
async fn test_activation_without_clients() {
    let world = TestWorld::new();
    world.clients.set_unavailable(true);
    let worker = world.active_worker(test_config("v1")).await;
    assert_eq!(worker.state().await, WorkerState::Activated);
    assert_eq!(world.clients.claims(), 0);
}

/// Test activation without a waiting version is refused.
#[tokio::test]
async fn test_activate_requires_waiting_version() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v1"));
    match worker.dispatch(WorkerEvent::Activate).await {
        EventOutcome::Activated(Err(WorkerError::NotActive)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }

    let worker = world.active_worker(test_config("v1")).await;
    match worker.dispatch(WorkerEvent::Activate).await {
        EventOutcome::Activated(Err(WorkerError::State(_))) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(worker.state().await, WorkerState::Activated);
}
