//! # Notification Tests
//!
//! Push payload display and notification interactions.

use url::Url;
use zewed_sw::{
    ClickOutcome, DisplayError, EventOutcome, NotificationData, WorkerError, WorkerEvent,
};
use zewed_sync::{SyncIntent, SyncStatus};

use crate::world::{test_config, url, TestWorld};

fn data(url: &str, job_id: Option<&str>) -> NotificationData {
    NotificationData {
        url: url.to_string(),
        id: job_id.map(str::to_string),
        job_id: job_id.map(str::to_string),
    }
}

async fn click(world: &TestWorld, action: Option<&str>, data: NotificationData) -> ClickOutcome {
    let worker = world.worker(test_config("v1"));
    match worker
        .dispatch(WorkerEvent::NotificationClick {
            action: action.map(str::to_string),
            data,
        })
        .await
    {
        EventOutcome::Clicked(Ok(outcome)) => outcome,
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// Test a complete payload is shown as sent.
#[tokio::test]
async fn test_push_full_payload() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v1"));
    let bytes = br#"{"title":"Backend Engineer","body":"Acme is hiring","url":"/jobs/7","id":7,"importance":"high"}"#;

    match worker.dispatch(WorkerEvent::Push(bytes.to_vec())).await {
        EventOutcome::Pushed(Ok(_)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }

    let shown = world.display.shown();
    assert_eq!(shown.len(), 1);
    let request = &shown[0];
    assert_eq!(request.title, "Backend Engineer");
    assert_eq!(request.body, "Acme is hiring");
    assert_eq!(request.data.url, "/jobs/7");
    assert_eq!(request.data.id.as_deref(), Some("7"));
    assert_eq!(request.data.job_id.as_deref(), Some("7"));
    assert_eq!(request.tag.as_deref(), Some("7"));
    assert!(request.require_interaction);
    assert!(!request.silent);
    let actions: Vec<_> = request.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, ["view", "save", "dismiss"]);
}

/// Test an empty or malformed payload falls back to the defaults.
#[tokio::test]
async fn test_push_defaults() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v1"));
    worker.dispatch(WorkerEvent::Push(Vec::new())).await;
    worker.dispatch(WorkerEvent::Push(b"{not json".to_vec())).await;

    let shown = world.display.shown();
    assert_eq!(shown.len(), 2);
    for request in shown {
        assert_eq!(request.title, "ZewedJobs");
        assert_eq!(request.body, "New job alert!");
        assert_eq!(request.data.url, "/");
        assert_eq!(request.vibrate, [200, 100, 200]);
        assert!(!request.require_interaction);
        assert_eq!(request.tag, None);
        let actions: Vec<_> = request.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, ["view", "dismiss"]);
    }
}

/// Test a payload with only an id links to the job page.
#[tokio::test]
async fn test_push_id_only_links_job() {
    let world = TestWorld::new();
    let worker = world.worker(test_config("v1"));
    worker
        .dispatch(WorkerEvent::Push(br#"{"id":"abc","importance":"low"}"#.to_vec()))
        .await;

    let request = &world.display.shown()[0];
    assert_eq!(request.data.url, "/jobs/abc");
    assert!(request.silent);
}

/// Test a denied display surfaces as an error.
#[tokio::test]
async fn test_push_display_denied() {
    let world = TestWorld::new();
    world.display.deny(true);
    let worker = world.worker(test_config("v1"));

    match worker.dispatch(WorkerEvent::Push(b"{}".to_vec())).await {
        EventOutcome::Pushed(Err(WorkerError::Display(DisplayError::PermissionDenied))) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// Test the view action opens the notification's page.
#[tokio::test]
async fn test_click_view_opens_url() {
    let world = TestWorld::new();
    let outcome = click(&world, Some("view"), data("/jobs/7", Some("7"))).await;
    let expected = Url::parse(&url("/jobs/7")).unwrap();
    assert_eq!(outcome, ClickOutcome::Opened(expected.clone()));
    assert_eq!(world.clients.opened(), [expected]);
}

/// Test the view action without a URL falls back to the job page.
#[tokio::test]
async fn test_click_view_without_url() {
    let world = TestWorld::new();
    let outcome = click(&world, Some("view"), data("", Some("12"))).await;
    assert_eq!(outcome, ClickOutcome::Opened(Url::parse(&url("/jobs/12")).unwrap()));

    let outcome = click(&world, Some("view"), data("", None)).await;
    assert_eq!(outcome, ClickOutcome::Opened(Url::parse(&url("/")).unwrap()));
}

/// Test the save action queues a favorite and confirms quietly.
#[tokio::test]
async fn test_click_save_queues_favorite() {
    let world = TestWorld::new();
    let outcome = click(&world, Some("save"), data("/jobs/7", Some("7"))).await;

    let ClickOutcome::Saved { record_id } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    let record = world.queue.get(record_id).await.unwrap().unwrap();
    assert_eq!(record.intent, SyncIntent::FavoriteToggle);
    assert_eq!(record.status, SyncStatus::Pending);
    assert_eq!(record.job_id.as_deref(), Some("7"));
    assert_eq!(record.payload["saved"], true);

    let shown = world.display.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Job saved");
    assert!(shown[0].silent);
    assert!(world.clients.opened().is_empty());
}

/// Test the save confirmation cannot itself be saved.
#[tokio::test]
async fn test_save_confirmation_is_not_saveable() {
    let world = TestWorld::new();
    click(&world, Some("save"), data("/jobs/42", Some("42"))).await;

    let confirmation = world.display.shown()[0].clone();
    assert_eq!(confirmation.data.job_id, None);
    assert!(confirmation.actions.iter().all(|a| a.action != "save"));

    let outcome = click(&world, Some("save"), confirmation.data).await;
    assert_eq!(outcome, ClickOutcome::Ignored);
    let queued = world.queue.by_status(SyncStatus::Pending).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].job_id.as_deref(), Some("42"));
}

/// Test saving still succeeds when the confirmation cannot be shown.
#[tokio::test]
async fn test_click_save_with_display_denied() {
    let world = TestWorld::new();
    world.display.deny(true);
    let outcome = click(&world, Some("save"), data("", Some("3"))).await;
    assert!(matches!(outcome, ClickOutcome::Saved { .. }));
    assert_eq!(world.queue.by_job("3").await.unwrap().len(), 1);
}

/// Test saving a notification without a job id does nothing.
#[tokio::test]
async fn test_click_save_without_id() {
    let world = TestWorld::new();
    let outcome = click(&world, Some("save"), data("/", None)).await;
    assert_eq!(outcome, ClickOutcome::Ignored);
    assert_eq!(world.queue.counts().await.unwrap().pending, 0);
}

/// Test dismissing does nothing else.
#[tokio::test]
async fn test_click_dismiss() {
    let world = TestWorld::new();
    let outcome = click(&world, Some("dismiss"), data("/jobs/7", Some("7"))).await;
    assert_eq!(outcome, ClickOutcome::Dismissed);
    assert!(world.clients.opened().is_empty());
    assert!(world.clients.focused().is_empty());
}

/// Test a plain click focuses an open application window.
#[tokio::test]
async fn test_click_body_focuses_window() {
    let world = TestWorld::new();
    world.clients.add_window("https://elsewhere.test/");
    let app = world.clients.add_window(&url("/jobs?page=2"));

    let outcome = click(&world, None, data("/jobs/7", Some("7"))).await;
    assert_eq!(outcome, ClickOutcome::Focused(app.clone()));
    assert_eq!(world.clients.focused(), [app]);
    assert!(world.clients.opened().is_empty());
}

/// Test a plain click opens the application when no window is open.
#[tokio::test]
async fn test_click_body_opens_root() {
    let world = TestWorld::new();
    world.clients.add_window("https://elsewhere.test/");

    let outcome = click(&world, Some("unknown-action"), data("/jobs/7", None)).await;
    assert_eq!(outcome, ClickOutcome::Opened(Url::parse(&url("/")).unwrap()));
}

/// Test a failing client capability surfaces as an error.
#[tokio::test]
async fn test_click_with_clients_unavailable() {
    let world = TestWorld::new();
    world.clients.set_unavailable(true);
    let worker = world.worker(test_config("v1"));

    match worker
        .dispatch(WorkerEvent::NotificationClick {
            action: Some("view".into()),
            data: data("/jobs/1", None),
        })
        .await
    {
        EventOutcome::Clicked(Err(WorkerError::Client(_))) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
}
