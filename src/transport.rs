pub mod mock;
pub mod websocket;

use crate::error::Result;
use crate::protocol::Frame;
use tokio::sync::mpsc::UnboundedReceiver;

pub use mock::{MockBehavior, MockController, MockTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport};

/// Inbound events surfaced by a transport after a successful connect.
///
/// The stream belongs to a single connection epoch: once `Closed` (or a fatal
/// `Error` followed by the socket closing) is delivered, the receiver runs dry
/// and a fresh `connect` produces a new stream.
#[derive(Debug)]
pub enum TransportEvent {
    /// A broker frame addressed to this client.
    Frame(Frame),
    /// A protocol-level error frame. The connection may still be alive;
    /// transport closure is reported separately via `Closed`.
    Error(crate::error::ChatError),
    /// The underlying connection closed, cleanly or not.
    Closed,
}

/// A duplex framed connection to the broker.
///
/// Implementations own the handshake: `connect` resolves only once the broker
/// has acknowledged the session, and returns the inbound event stream for that
/// connection. `send` hands a frame to the transport without waiting for any
/// broker acknowledgement.
pub trait Transport: Send + Sync {
    /// Establishes a connection and completes the broker handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails.
    fn connect(
        &mut self,
    ) -> impl std::future::Future<Output = Result<UnboundedReceiver<TransportEvent>>> + Send;

    /// Writes a frame to the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is not connected or the write fails.
    fn send(&mut self, frame: Frame) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Closes the connection. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be closed cleanly.
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}
