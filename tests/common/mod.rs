#![allow(dead_code)]

use agrichat::{BrokerClient, ConnectionEvent, ManagerConfig, MockController, MockTransport};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Base reconnect delay used across the integration suites.
pub const BASE_DELAY: Duration = Duration::from_millis(100);

/// Routes client logs through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Client over a mock transport, plus the controller driving that transport.
pub fn client_with_mock() -> (BrokerClient<MockTransport>, MockController) {
    init_tracing();
    let transport = MockTransport::new();
    let controller = transport.controller();
    let config = ManagerConfig::default().with_reconnect_base_delay(BASE_DELAY);
    (BrokerClient::new(transport, config), controller)
}

/// Registers an observer that records every connection event.
pub async fn record_events(
    client: &BrokerClient<MockTransport>,
) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    client
        .on_connection_event(move |event| {
            sink.lock().unwrap().push(event);
        })
        .await;
    events
}

/// Lets spawned client tasks (pump dispatch, event delivery) run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
