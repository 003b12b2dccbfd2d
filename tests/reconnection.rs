//! Reconnect backoff: exact delay doubling, the attempt ceiling, and counter
//! resets on success and on explicit connect.

mod common;

use agrichat::ConnectionEvent;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_until_exhausted() {
    let (client, controller) = common::client_with_mock();
    let events = common::record_events(&client).await;
    client.connect().await.unwrap();

    controller.set_fail_connect(true).await;
    let dropped_at = tokio::time::Instant::now();
    controller.drop_connection().await;

    tokio::time::sleep(common::BASE_DELAY * 64).await;

    // Initial connect plus five recovery attempts, then nothing.
    let attempts = controller.attempt_times().await;
    assert_eq!(attempts.len(), 6);

    let d = common::BASE_DELAY;
    assert_eq!(attempts[1] - dropped_at, d);
    assert_eq!(attempts[2] - attempts[1], 2 * d);
    assert_eq!(attempts[3] - attempts[2], 4 * d);
    assert_eq!(attempts[4] - attempts[3], 8 * d);
    assert_eq!(attempts[5] - attempts[4], 16 * d);

    tokio::time::sleep(common::BASE_DELAY * 64).await;
    assert_eq!(controller.connect_attempts().await, 6);

    let events = events.lock().unwrap();
    let scheduled: Vec<(u32, Duration)> = events
        .iter()
        .filter_map(|event| match event {
            ConnectionEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect();
    assert_eq!(
        scheduled,
        vec![(1, d), (2, 2 * d), (3, 4 * d), (4, 8 * d), (5, 16 * d)]
    );
    assert!(events
        .iter()
        .any(|event| matches!(event, ConnectionEvent::ReconnectExhausted { attempts: 5 })));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_after_exhaustion_starts_fresh() {
    let (client, controller) = common::client_with_mock();
    client.connect().await.unwrap();

    controller.set_fail_connect(true).await;
    controller.drop_connection().await;
    tokio::time::sleep(common::BASE_DELAY * 64).await;
    assert_eq!(controller.connect_attempts().await, 6);
    assert!(!client.is_connected().await);

    controller.set_fail_connect(false).await;
    client.connect().await.unwrap();
    assert!(client.is_connected().await);
    assert_eq!(controller.connect_attempts().await, 7);
}

#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_resets_attempt_counter() {
    let (client, controller) = common::client_with_mock();
    let events = common::record_events(&client).await;
    client.connect().await.unwrap();

    // First outage: two failed attempts, then the third succeeds.
    controller.set_fail_connect(true).await;
    controller.drop_connection().await;
    tokio::time::sleep(common::BASE_DELAY * 3 + Duration::from_millis(10)).await;
    controller.set_fail_connect(false).await;
    tokio::time::sleep(common::BASE_DELAY * 5).await;
    assert!(client.is_connected().await);

    // Second outage: recovery starts over at attempt 1 with the base delay.
    controller.drop_connection().await;
    tokio::time::sleep(common::BASE_DELAY * 2).await;
    assert!(client.is_connected().await);

    let events = events.lock().unwrap();
    let scheduled: Vec<(u32, Duration)> = events
        .iter()
        .filter_map(|event| match event {
            ConnectionEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect();
    let d = common::BASE_DELAY;
    assert_eq!(scheduled, vec![(1, d), (2, 2 * d), (3, 4 * d), (1, d)]);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_emits_disconnected_then_connected() {
    let (client, controller) = common::client_with_mock();
    let events = common::record_events(&client).await;
    client.connect().await.unwrap();

    controller.drop_connection().await;
    tokio::time::sleep(common::BASE_DELAY * 2).await;
    assert!(client.is_connected().await);

    let events = events.lock().unwrap();
    let names: Vec<&str> = events
        .iter()
        .map(|event| match event {
            ConnectionEvent::Connected => "connected",
            ConnectionEvent::Disconnected { .. } => "disconnected",
            ConnectionEvent::Reconnecting { .. } => "reconnecting",
            ConnectionEvent::ReconnectFailed { .. } => "reconnect-failed",
            ConnectionEvent::ReconnectExhausted { .. } => "exhausted",
            ConnectionEvent::BrokerError { .. } => "broker-error",
        })
        .collect();
    assert_eq!(
        names,
        vec!["connected", "disconnected", "reconnecting", "connected"]
    );
}
