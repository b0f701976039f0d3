//! # Dispatch Tests
//!
//! Request interception decisions and control messages.

use serde_json::{json, Value};
use tokio::sync::oneshot;
use zewed_sw::{
    BypassReason, ControlReply, EventOutcome, FetchDecision, IncomingRequest, PartitionStatus,
    ServiceWorker, WorkerEvent,
};

use crate::world::{test_config, url, TestWorld};

async fn message(worker: &ServiceWorker, message: Value) -> ControlReply {
    let (reply, receiver) = oneshot::channel();
    let outcome = worker
        .dispatch(WorkerEvent::Message { message, reply })
        .await;
    let received = receiver.await.unwrap();
    match outcome {
        EventOutcome::Replied(answer) => assert_eq!(answer, received),
        other => panic!("unexpected outcome: {other:?}"),
    }
    received
}

/// Test requests are passed through until the version is active.
#[tokio::test]
async fn test_fetch_before_activation_is_bypassed() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v1"));
    match worker
        .dispatch(WorkerEvent::Fetch(IncomingRequest::get(url("/"))))
        .await
    {
        EventOutcome::Fetched(FetchDecision::Bypass(BypassReason::NotActive)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(world.network.requests().is_empty());
}

/// Test non-GET requests are never intercepted.
#[tokio::test]
async fn test_fetch_bypasses_non_get() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.clear_requests();

    let post = IncomingRequest::get(url("/api/applications")).method("post");
    assert_eq!(
        worker.handle_fetch(&post).await,
        FetchDecision::Bypass(BypassReason::Method)
    );
    assert!(world.network.requests().is_empty());
}

/// Test extension and non-http schemes are never intercepted.
#[tokio::test]
async fn test_fetch_bypasses_other_schemes() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;

    for target in ["chrome-extension://abc/script.js", "data:text/plain,hi", "ftp://files.test/a"] {
        assert_eq!(
            worker.handle_fetch(&IncomingRequest::get(target)).await,
            FetchDecision::Bypass(BypassReason::Scheme),
            "{target}"
        );
    }
}

/// Test unparseable requests are passed through.
#[tokio::test]
async fn test_fetch_bypasses_malformed() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;

    assert_eq!(
        worker.handle_fetch(&IncomingRequest::get("not a url")).await,
        FetchDecision::Bypass(BypassReason::Malformed)
    );
    assert_eq!(
        worker
            .handle_fetch(&IncomingRequest::get(url("/")).method("GE T"))
            .await,
        FetchDecision::Bypass(BypassReason::Malformed)
    );
}

/// Test the version message.
#[tokio::test]
async fn test_get_version() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v7"));
    let reply = message(&worker, json!({"type": "GET_VERSION"})).await;
    assert_eq!(reply.to_json(), json!({"version": "v7"}));
}

/// Test unknown messages get an error reply.
#[tokio::test]
async fn test_unknown_message() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v1"));
    assert_eq!(
        message(&worker, json!({"type": "SELF_DESTRUCT"})).await,
        ControlReply::unknown()
    );
    assert_eq!(message(&worker, json!(42)).await, ControlReply::unknown());
}

/// Test keep-alive messages are acknowledged.
#[tokio::test]
async fn test_keep_alive() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v1"));
    assert_eq!(
        message(&worker, json!({"type": "KEEP_ALIVE"})).await,
        ControlReply::Alive { alive: true }
    );
}

/// Test cache status lists partitions with their entry counts.
#[tokio::test]
async fn test_cache_status() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;

    let reply = message(&worker, json!({"type": "GET_CACHE_STATUS"})).await;
    assert_eq!(
        reply,
        ControlReply::Status {
            version: "v1".into(),
            partitions: vec![
                PartitionStatus {
                    name: "api-v1".into(),
                    entries: 0
                },
                PartitionStatus {
                    name: "static-v1".into(),
                    entries: 6
                },
            ],
        }
    );
}

/// Test clearing a single partition.
#[tokio::test]
async fn test_clear_named_partition() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;

    let reply = message(&worker, json!({"type": "CLEAR_CACHE", "name": "api-v1"})).await;
    assert_eq!(
        reply,
        ControlReply::Cleared {
            cleared: vec!["api-v1".into()]
        }
    );

    let reply = message(&worker, json!({"type": "CLEAR_CACHE", "name": "api-v1"})).await;
    assert_eq!(reply, ControlReply::Cleared { cleared: vec![] });
}

/// Test clearing every partition.
#[tokio::test]
async fn test_clear_all_partitions() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;

    let reply = message(&worker, json!({"type": "CLEAR_CACHE"})).await;
    assert_eq!(
        reply,
        ControlReply::Cleared {
            cleared: vec!["api-v1".into(), "static-v1".into()]
        }
    );
    let reply = message(&worker, json!({"type": "GET_CACHE_STATUS"})).await;
    assert_eq!(reply.to_json()["partitions"], json!([]));
}

/// Test an update refetches every precache entry.
#[tokio::test]
async fn test_update_cache_overwrites() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    world.network.respond_text(&url("/offline.html"), 200, "new offline page");
    world.network.fail(&url("/assets/js/main.min.js"));

    let reply = message(&worker, json!({"type": "UPDATE_CACHE"})).await;
    assert_eq!(
        reply,
        ControlReply::Updated {
            updated: 5,
            failed: 1
        }
    );

    world.network.set_online(false);
    let response = world.get(&worker, "/somewhere").await;
    assert_eq!(response.text(), "new offline page");
}

/// Test shutdown refuses further background work.
#[tokio::test]
async fn test_shutdown_refuses_background_work() {
    let world = TestWorld::new();
    let worker = world.active_worker(test_config("v1")).await;
    worker.shutdown().await;
    assert!(worker.tasks().is_closed());

    match worker.dispatch(WorkerEvent::Connectivity { online: true }).await {
        EventOutcome::ConnectivityChanged {
            online: true,
            replay_scheduled: false,
        } => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(worker.tasks().pending(), 0);
}
