//! Connection lifecycle: idempotent connect/disconnect and outcome sharing
//! between concurrent connect callers.

mod common;

use agrichat::{ChatError, ConnectionEvent, ConnectionState, MockBehavior};
use std::time::Duration;

#[tokio::test]
async fn test_sequential_connects_reuse_connection() {
    let (client, controller) = common::client_with_mock();

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    client.connect().await.unwrap();

    assert_eq!(controller.connect_attempts().await, 1);
    assert_eq!(client.state().await, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    let (client, controller) = common::client_with_mock();
    controller
        .set_behavior(MockBehavior {
            connect_delay_ms: 50,
            ..Default::default()
        })
        .await;

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(controller.connect_attempts().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_failure_outcome() {
    let (client, controller) = common::client_with_mock();
    controller
        .set_behavior(MockBehavior {
            fail_connect: true,
            connect_delay_ms: 50,
            ..Default::default()
        })
        .await;

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert!(matches!(first, Err(ChatError::ConnectionError(_))));
    assert!(matches!(second, Err(ChatError::ConnectionError(_))));

    // One transport attempt served both callers.
    assert_eq!(controller.connect_attempts().await, 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_clears_registry_and_queue() {
    let (client, controller) = common::client_with_mock();
    client.connect().await.unwrap();

    client.subscribe("/topic/user.42", |_| {}).await;
    controller.set_fail_send_times(1).await;
    let delivered = client.publish("/app/chat.send", "{}", &[]).await;
    assert!(!delivered);
    assert_eq!(client.queued_message_count().await, 1);
    assert_eq!(client.subscription_count().await, 1);

    client.disconnect().await;
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(client.queued_message_count().await, 0);
    assert_eq!(client.subscription_count().await, 0);

    // A fresh connect starts from a clean slate: nothing drained, nothing
    // replayed.
    controller.clear_sent().await;
    client.connect().await.unwrap();
    common::settle().await;
    assert!(controller.sent_frames().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let (client, controller) = common::client_with_mock();
    controller.set_fail_connect(true).await;

    assert!(client.connect().await.is_err());
    assert_eq!(controller.connect_attempts().await, 1);

    client.disconnect().await;
    tokio::time::sleep(common::BASE_DELAY * 64).await;
    assert_eq!(controller.connect_attempts().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_publish_does_not_wait_for_inflight_connect() {
    let (client, controller) = common::client_with_mock();
    controller
        .set_behavior(MockBehavior {
            connect_delay_ms: 500,
            ..Default::default()
        })
        .await;

    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.state().await, ConnectionState::Connecting);

    // Queues and returns while the handshake is still in flight.
    let publish = client.publish("/app/chat.send", "\"hi\"", &[]);
    let delivered = tokio::time::timeout(Duration::from_millis(50), publish)
        .await
        .expect("publish must not wait for the handshake");
    assert!(!delivered);
    assert_eq!(client.queued_message_count().await, 1);

    connecting.await.unwrap().unwrap();
    assert_eq!(client.queued_message_count().await, 0);
    let sent = controller.sent_frames().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "\"hi\"");
}

#[tokio::test]
async fn test_broker_error_frame_leaves_connection_up() {
    let (client, controller) = common::client_with_mock();
    let events = common::record_events(&client).await;
    client.connect().await.unwrap();

    controller
        .inject_error(ChatError::BrokerError("bad destination".to_string()))
        .await;
    common::settle().await;

    assert_eq!(client.state().await, ConnectionState::Connected);
    let events = events.lock().unwrap();
    assert!(events.iter().any(|event| matches!(
        event,
        ConnectionEvent::BrokerError { message } if message.contains("bad destination")
    )));
    assert!(!events
        .iter()
        .any(|event| matches!(event, ConnectionEvent::Disconnected { .. })));
}

#[tokio::test]
async fn test_disconnect_before_connect_is_noop() {
    let (client, controller) = common::client_with_mock();
    client.disconnect().await;
    assert_eq!(client.state().await, ConnectionState::Disconnected);
    assert_eq!(controller.connect_attempts().await, 0);
}
