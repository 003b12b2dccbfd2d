//! Mock transport for exercising the client without a broker.
//!
//! Public (not test-gated) so integration tests under `tests/` can drive the
//! client through connect failures, send failures, injected inbound frames,
//! and simulated connection drops.

use crate::error::{ChatError, Result};
use crate::protocol::Frame;
use crate::transport::{Transport, TransportEvent};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

/// Mock transport behavior configuration.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Fail every connect attempt while set.
    pub fail_connect: bool,
    /// Fail the next N send attempts, then succeed.
    pub fail_send_times: u32,
    /// Delay applied to connect attempts (milliseconds).
    pub connect_delay_ms: u64,
    /// Delay applied to send attempts (milliseconds).
    pub send_delay_ms: u64,
}

#[derive(Debug, Default)]
struct MockShared {
    behavior: Mutex<MockBehavior>,
    /// Frames accepted by `send`, across all connection epochs.
    sent: Mutex<Vec<Frame>>,
    /// Start instant of every connect attempt, successful or not.
    attempts: Mutex<Vec<tokio::time::Instant>>,
    connected: Mutex<bool>,
    /// Sender half of the current epoch's event stream.
    event_tx: Mutex<Option<UnboundedSender<TransportEvent>>>,
}

/// Mock transport handed to the client under test.
#[derive(Default)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

/// Test-side handle to a [`MockTransport`] owned by the client.
#[derive(Clone)]
pub struct MockController {
    shared: Arc<MockShared>,
}

impl MockTransport {
    /// Creates a mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a controller sharing this transport's state.
    #[must_use]
    pub fn controller(&self) -> MockController {
        MockController {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl MockController {
    /// Replaces the behavior configuration.
    pub async fn set_behavior(&self, behavior: MockBehavior) {
        *self.shared.behavior.lock().await = behavior;
    }

    /// Toggles connect failures.
    pub async fn set_fail_connect(&self, fail: bool) {
        self.shared.behavior.lock().await.fail_connect = fail;
    }

    /// Makes the next `n` send attempts fail.
    pub async fn set_fail_send_times(&self, n: u32) {
        self.shared.behavior.lock().await.fail_send_times = n;
    }

    /// All frames the client has successfully sent, oldest first.
    pub async fn sent_frames(&self) -> Vec<Frame> {
        self.shared.sent.lock().await.clone()
    }

    /// Clears the captured outbound frames.
    pub async fn clear_sent(&self) {
        self.shared.sent.lock().await.clear();
    }

    /// Number of connect attempts made so far.
    pub async fn connect_attempts(&self) -> usize {
        self.shared.attempts.lock().await.len()
    }

    /// Start instants of every connect attempt.
    pub async fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.shared.attempts.lock().await.clone()
    }

    /// Whether the transport currently reports itself connected.
    pub async fn is_connected(&self) -> bool {
        *self.shared.connected.lock().await
    }

    /// Delivers a broker frame to the client's event stream.
    pub async fn inject_frame(&self, frame: Frame) {
        if let Some(tx) = self.shared.event_tx.lock().await.as_ref() {
            let _ = tx.send(TransportEvent::Frame(frame));
        }
    }

    /// Delivers a protocol-level error to the client's event stream.
    pub async fn inject_error(&self, error: ChatError) {
        if let Some(tx) = self.shared.event_tx.lock().await.as_ref() {
            let _ = tx.send(TransportEvent::Error(error));
        }
    }

    /// Simulates an unexpected connection drop: the current epoch's stream
    /// observes `Closed` and the transport goes disconnected.
    pub async fn drop_connection(&self) {
        *self.shared.connected.lock().await = false;
        if let Some(tx) = self.shared.event_tx.lock().await.take() {
            let _ = tx.send(TransportEvent::Closed);
        }
    }
}

impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<UnboundedReceiver<TransportEvent>> {
        self.shared
            .attempts
            .lock()
            .await
            .push(tokio::time::Instant::now());

        let behavior = self.shared.behavior.lock().await.clone();
        if behavior.connect_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(behavior.connect_delay_ms))
                .await;
        }
        if behavior.fail_connect {
            return Err(ChatError::ConnectionError(
                "Mock connect failure".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.event_tx.lock().await = Some(tx);
        *self.shared.connected.lock().await = true;
        Ok(rx)
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        if !*self.shared.connected.lock().await {
            return Err(ChatError::NotConnected);
        }

        let delay_ms = self.shared.behavior.lock().await.send_delay_ms;
        if delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
        }

        let mut behavior = self.shared.behavior.lock().await;
        if behavior.fail_send_times > 0 {
            behavior.fail_send_times -= 1;
            return Err(ChatError::ConnectionError("Mock send failure".to_string()));
        }
        drop(behavior);

        self.shared.sent.lock().await.push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.shared.connected.lock().await = false;
        self.shared.event_tx.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    #[tokio::test]
    async fn test_mock_connect_and_send() {
        let mut transport = MockTransport::new();
        let controller = transport.controller();

        // Not connected yet
        assert!(transport.send(Frame::disconnect()).await.is_err());

        let _events = transport.connect().await.unwrap();
        assert!(controller.is_connected().await);
        assert_eq!(controller.connect_attempts().await, 1);

        transport
            .send(Frame::send("/app/chat.send", "{}", &[]))
            .await
            .unwrap();
        let sent = controller.sent_frames().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command, Command::Send);
    }

    #[tokio::test]
    async fn test_mock_connect_failure() {
        let mut transport = MockTransport::new();
        let controller = transport.controller();
        controller.set_fail_connect(true).await;

        assert!(transport.connect().await.is_err());
        assert!(!controller.is_connected().await);
        assert_eq!(controller.connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn test_mock_send_failure_budget() {
        let mut transport = MockTransport::new();
        let controller = transport.controller();
        let _events = transport.connect().await.unwrap();

        controller.set_fail_send_times(1).await;
        assert!(transport.send(Frame::disconnect()).await.is_err());
        assert!(transport.send(Frame::disconnect()).await.is_ok());
        assert_eq!(controller.sent_frames().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_drop_connection_emits_closed() {
        let mut transport = MockTransport::new();
        let controller = transport.controller();
        let mut events = transport.connect().await.unwrap();

        controller.drop_connection().await;
        match events.recv().await {
            Some(TransportEvent::Closed) => {}
            other => panic!("Expected Closed event, got {other:?}"),
        }
        assert!(!controller.is_connected().await);
    }

    #[tokio::test]
    async fn test_mock_inject_frame() {
        let mut transport = MockTransport::new();
        let controller = transport.controller();
        let mut events = transport.connect().await.unwrap();

        let mut frame = Frame::new(Command::Message);
        frame.push_header("destination", "/topic/user.42");
        controller.inject_frame(frame).await;

        match events.recv().await {
            Some(TransportEvent::Frame(frame)) => {
                assert_eq!(frame.destination(), Some("/topic/user.42"));
            }
            other => panic!("Expected Frame event, got {other:?}"),
        }
    }
}
