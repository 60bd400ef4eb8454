#![allow(clippy::unwrap_used)]
// Integration tests for object observation against an in-memory wire.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;

use common::{client, object_until, settle, title, todo, MockWire};
use ontoscope_core::{
    CoreError, ObjectPayload, ObserveMode, ObserveObjectOptions, Status, Unsubscribable, WireError,
};

// ── Loading ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_observe_loads_object() {
    let wire = MockWire::new();
    wire.put(todo(1, "write docs", false));
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    assert_eq!(obs.current().status, Status::Loading);
    assert!(obs.current().object.is_none());

    let loaded = object_until(&mut obs, |p| p.status == Status::Loaded).await;
    assert_eq!(title(&loaded).as_deref(), Some("write docs"));
    assert!(!loaded.is_optimistic);
    assert_eq!(wire.object_fetches(), 1);
}

#[tokio::test]
async fn test_concurrent_observers_share_one_fetch() {
    let wire = MockWire::new();
    wire.put(todo(1, "write docs", false));
    wire.hold();
    let client = client(&wire);

    let mut first = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    let mut second = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    settle().await;
    wire.open();

    object_until(&mut first, |p| p.status == Status::Loaded).await;
    object_until(&mut second, |p| p.status == Status::Loaded).await;
    assert_eq!(wire.object_fetches(), 1);
}

#[tokio::test]
async fn test_fresh_value_is_not_refetched() {
    let wire = MockWire::new();
    wire.put(todo(1, "write docs", false));
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    object_until(&mut obs, |p| p.status == Status::Loaded).await;

    let late = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    assert_eq!(late.current().status, Status::Loaded);
    settle().await;
    assert_eq!(wire.object_fetches(), 1);

    let _forced = client.observe_object(
        "Todo",
        1,
        ObserveObjectOptions {
            mode: ObserveMode::Force,
            ..Default::default()
        },
    );
    settle().await;
    assert_eq!(wire.object_fetches(), 2);
}

#[tokio::test]
async fn test_offline_mode_never_fetches() {
    let wire = MockWire::new();
    let client = client(&wire);

    let obs = client.observe_object(
        "Todo",
        1,
        ObserveObjectOptions {
            mode: ObserveMode::Offline,
            ..Default::default()
        },
    );
    settle().await;
    assert_eq!(obs.current().status, Status::Init);
    assert_eq!(wire.object_fetches(), 0);
}

// ── Refresh ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_keeps_value_visible() {
    let wire = MockWire::new();
    wire.put(todo(1, "draft", false));
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    object_until(&mut obs, |p| p.status == Status::Loaded).await;

    wire.put(todo(1, "final", false));
    wire.hold();
    let refresher = client.clone();
    let task = tokio::spawn(async move { refresher.invalidate_object("Todo", 1).await });
    settle().await;
    assert_eq!(obs.latest().status, Status::Loaded);
    assert_eq!(title(&obs.latest()).as_deref(), Some("draft"));

    wire.open();
    task.await.unwrap();
    let next = obs.changed().await.unwrap();
    assert_eq!(next.status, Status::Loaded);
    assert_eq!(title(&next).as_deref(), Some("final"));
}

#[tokio::test]
async fn test_unchanged_refetch_emits_nothing() {
    let wire = MockWire::new();
    wire.put(todo(1, "draft", false));
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    object_until(&mut obs, |p| p.status == Status::Loaded).await;

    obs.refresh().await;
    assert_eq!(wire.object_fetches(), 2);
    let next = tokio::time::timeout(Duration::from_millis(50), obs.changed()).await;
    assert!(next.is_err(), "identical data must not emit");
}

// ── Errors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_error_keeps_observation_alive() {
    let wire = MockWire::new();
    wire.put(todo(1, "draft", false));
    wire.fail_objects(Some(WireError::Transport {
        message: "connection reset".into(),
    }));
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    let failed = object_until(&mut obs, |p| p.status == Status::Error).await;
    assert!(failed.object.is_none());
    assert!(
        matches!(failed.error.as_deref(), Some(CoreError::Fetch { object_type, .. }) if object_type == "Todo"),
        "expected fetch error, got: {:?}",
        failed.error
    );

    wire.fail_objects(None);
    obs.refresh().await;
    let recovered = object_until(&mut obs, |p| p.status == Status::Loaded).await;
    assert_eq!(title(&recovered).as_deref(), Some("draft"));
    assert!(recovered.error.is_none());
}

#[tokio::test]
async fn test_missing_object_reports_not_found() {
    let wire = MockWire::new();
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 42, ObserveObjectOptions::default());
    let failed = object_until(&mut obs, |p| p.status == Status::Error).await;
    assert!(matches!(
        failed.error.as_deref(),
        Some(CoreError::NotFound { primary_key, .. }) if primary_key == "42"
    ));
}

#[tokio::test]
async fn test_refresh_error_keeps_previous_value() {
    let wire = MockWire::new();
    wire.put(todo(1, "draft", false));
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    object_until(&mut obs, |p| p.status == Status::Loaded).await;

    wire.fail_objects(Some(WireError::Transport {
        message: "timeout".into(),
    }));
    obs.refresh().await;
    let failed = object_until(&mut obs, |p| p.status == Status::Error).await;
    assert_eq!(title(&failed).as_deref(), Some("draft"));
}

// ── Subscriptions ───────────────────────────────────────────────────

#[tokio::test]
async fn test_subscription_delivers_and_unsubscribes() {
    let wire = MockWire::new();
    wire.put(todo(1, "draft", false));
    wire.hold();
    let client = client(&wire);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut subscription = client.subscribe_object(
        "Todo",
        1,
        ObserveObjectOptions::default(),
        move |payload: ObjectPayload| {
            let _ = tx.send(payload.status);
        },
    );

    let mut seen = vec![rx.recv().await.unwrap()];
    wire.open();
    while let Some(status) = rx.recv().await {
        seen.push(status);
        if status == Status::Loaded {
            break;
        }
    }
    assert_eq!(seen.first(), Some(&Status::Loading));
    assert_eq!(seen.last(), Some(&Status::Loaded));

    subscription.unsubscribe();
    subscription.unsubscribe();
    assert!(subscription.is_closed());
}

#[tokio::test]
async fn test_stream_replays_latest_value() {
    use futures_util::StreamExt;

    let wire = MockWire::new();
    wire.put(todo(1, "draft", false));
    let client = client(&wire);

    let mut obs = client.observe_object("Todo", 1, ObserveObjectOptions::default());
    object_until(&mut obs, |p| p.status == Status::Loaded).await;

    let mut stream = obs.into_stream();
    let first = stream.next().await.unwrap();
    assert_eq!(title(&first).as_deref(), Some("draft"));
}
