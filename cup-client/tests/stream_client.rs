//! Notification stream client behavior under an in-memory transport
//!
//! Time-dependent behavior (backoff schedules, idle timeouts) runs under
//! paused tokio time, so delays are asserted exactly.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use cup_client::stream::{ChannelConnector, StreamConnector};
use cup_client::{NotificationStore, NotificationStreamClient, RealtimeConfig, StoreEvent};

fn test_config() -> RealtimeConfig {
    // Idle detection is exercised by its own test; everywhere else it
    // would fire spuriously while virtual time advances.
    RealtimeConfig::new("http://localhost:8080", "ws://localhost:8080/ws/orders")
        .with_idle_timeout(Duration::ZERO)
}

fn test_client(
    config: &RealtimeConfig,
) -> (
    NotificationStreamClient,
    Arc<ChannelConnector>,
    Arc<NotificationStore>,
) {
    let _ = tracing_subscriber::fmt::try_init();
    let connector = Arc::new(ChannelConnector::new());
    let store = Arc::new(NotificationStore::new());
    // `Arc::clone` would infer the trait-object type and fail to unsize;
    // the method call keeps the concrete type and coerces.
    let dyn_connector: Arc<dyn StreamConnector> = connector.clone();
    let client = NotificationStreamClient::with_connector(config, Arc::clone(&store), dyn_connector);
    (client, connector, store)
}

async fn next_store_event(rx: &mut broadcast::Receiver<StoreEvent>) -> StoreEvent {
    tokio::time::timeout(Duration::from_secs(300), rx.recv())
        .await
        .expect("timed out waiting for store event")
        .expect("store event channel closed")
}

async fn wait_for_connection(rx: &mut broadcast::Receiver<StoreEvent>, connected: bool) {
    loop {
        if let StoreEvent::ConnectionChanged(c) = next_store_event(rx).await {
            if c == connected {
                return;
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_frames_route_into_store() {
    let (client, connector, store) = test_client(&test_config());
    let handle = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("token-1");
    wait_for_connection(&mut rx, true).await;
    assert!(store.is_connected());
    assert!(client.is_connected());

    handle.send_json(json!({
        "type": "notification",
        "notification": {"id": 5, "title": "Order ready", "message": "Pick it up"}
    }));
    handle.send_json(json!({"type": "unread_count", "count": 3}));

    match next_store_event(&mut rx).await {
        StoreEvent::NotificationAdded(n) => {
            assert_eq!(n.id, 5);
            assert_eq!(n.title, "Order ready");
        }
        other => panic!("Expected NotificationAdded, got {:?}", other),
    }
    assert!(matches!(
        next_store_event(&mut rx).await,
        StoreEvent::UnreadChanged(3)
    ));
    assert_eq!(store.unread_count(), 3);
    assert_eq!(connector.tokens(), vec!["token-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_idempotent() {
    let (client, connector, store) = test_client(&test_config());
    let _handle = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("tok");
    client.connect("tok");
    wait_for_connection(&mut rx, true).await;
    client.connect("tok");

    // One supervisor, one dial.
    assert_eq!(connector.dial_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_and_terminal_cap() {
    // Default policy: base 1s doubling, 5 attempts.
    let (client, connector, _store) = test_client(&test_config());
    for _ in 0..6 {
        connector.refuse_next();
    }

    client.connect("tok");
    tokio::time::sleep(Duration::from_secs(600)).await;

    // Initial dial plus five retries, then the budget is exhausted.
    let dials = connector.dial_instants();
    assert_eq!(dials.len(), 6);
    let gaps: Vec<Duration> = dials.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(16),
        ]
    );

    // Terminal: no seventh dial, ever; state stays observably down.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.dial_count(), 6);
    assert!(!client.is_connected());
    assert_eq!(client.reconnect_attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_counter_resets_only_on_open() {
    let (client, connector, store) = test_client(&test_config());
    connector.refuse_next();
    connector.refuse_next();
    let handle = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("tok");
    wait_for_connection(&mut rx, true).await;

    assert_eq!(connector.dial_count(), 3);
    assert_eq!(client.reconnect_attempts(), 0);

    // After a confirmed open, the next loss restarts at the base delay.
    let _next = connector.expect_session();
    let lost_at = tokio::time::Instant::now();
    handle.close();
    wait_for_connection(&mut rx, false).await;
    wait_for_connection(&mut rx, true).await;

    let dials = connector.dial_instants();
    assert_eq!(dials.len(), 4);
    assert_eq!(dials[3] - lost_at, Duration::from_secs(1));
    assert_eq!(client.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_backoff() {
    let (client, connector, _store) = test_client(&test_config());
    connector.refuse_next();

    client.connect("tok");
    // Land inside the 1s retry sleep.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.dial_count(), 1);

    client.disconnect();
    tokio::time::sleep(Duration::from_secs(600)).await;

    // The pending retry never fired.
    assert_eq!(connector.dial_count(), 1);
    assert!(!client.is_connected());

    // A fresh connect starts a new epoch.
    let _handle = connector.expect_session();
    client.connect("tok-2");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connector.dial_count(), 2);
    assert!(client.is_connected());
    assert_eq!(connector.tokens(), vec!["tok", "tok-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_do_not_tear_down_the_stream() {
    let (client, connector, store) = test_client(&test_config());
    let handle = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("tok");
    wait_for_connection(&mut rx, true).await;

    handle.send("", "this is not json");
    handle.send("order_update", "{\"order_id\":");
    handle.send_json(json!({
        "type": "notification",
        "notification": {"id": 1, "title": "Still here", "message": "ok"}
    }));

    // The valid frame after the garbage still lands; no reconnect.
    assert!(matches!(
        next_store_event(&mut rx).await,
        StoreEvent::NotificationAdded(n) if n.id == 1
    ));
    assert_eq!(store.len(), 1);
    assert_eq!(connector.dial_count(), 1);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_frames_are_dropped_without_state_change() {
    let (client, connector, store) = test_client(&test_config());
    let handle = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("tok");
    wait_for_connection(&mut rx, true).await;

    handle.send("seasonal_theme", r#"{"theme":"autumn"}"#);
    handle.send_json(json!({"type": "telemetry", "sample": 1}));
    handle.send_json(json!({
        "type": "notification",
        "notification": {"id": 2, "title": "After", "message": "unknowns"}
    }));

    assert!(matches!(
        next_store_event(&mut rx).await,
        StoreEvent::NotificationAdded(n) if n.id == 2
    ));
    assert_eq!(store.len(), 1);
    assert_eq!(store.unread_count(), 0);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_channel_events_synthesize_records_most_recent_first() {
    let (client, connector, store) = test_client(&test_config());
    let handle = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("tok");
    wait_for_connection(&mut rx, true).await;

    handle.send("order_update", r#"{"order_id":"ORD-1","status":"preparing"}"#);
    handle.send("payment_update", r#"{"order_id":"ORD-1","status":"captured","amount":4.5}"#);
    handle.send("promo", r#"{"title":"Happy Hour","message":"-20% on flat whites"}"#);

    for _ in 0..3 {
        assert!(matches!(
            next_store_event(&mut rx).await,
            StoreEvent::NotificationAdded(_)
        ));
    }

    let records = store.notifications();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].title, "Happy Hour");
    assert_eq!(records[1].title, "Payment update");
    assert_eq!(records[2].title, "Order update");
    // Locally synthesized ids never collide, even within one burst.
    assert_ne!(records[0].id, records[1].id);
    assert_ne!(records[1].id, records[2].id);
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_is_recycled() {
    let config = RealtimeConfig::new("http://localhost:8080", "ws://localhost:8080/ws")
        .with_idle_timeout(Duration::from_secs(5));
    let (client, connector, store) = test_client(&config);
    let _first = connector.expect_session();
    let _second = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("tok");
    wait_for_connection(&mut rx, true).await;

    // Nothing arrives: the connection is torn down after the idle window
    // and re-dialed after the base backoff delay.
    wait_for_connection(&mut rx, false).await;
    wait_for_connection(&mut rx, true).await;

    let dials = connector.dial_instants();
    assert_eq!(dials.len(), 2);
    assert_eq!(dials[1] - dials[0], Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_server_close_triggers_reconnect_with_fresh_token() {
    let (client, connector, store) = test_client(&test_config());
    let first = connector.expect_session();
    let _second = connector.expect_session();
    let mut rx = store.subscribe();

    client.connect("tok");
    wait_for_connection(&mut rx, true).await;

    first.close();
    wait_for_connection(&mut rx, false).await;
    wait_for_connection(&mut rx, true).await;

    // The same token is presented on every dial of the epoch.
    assert_eq!(connector.tokens(), vec!["tok", "tok"]);
}
