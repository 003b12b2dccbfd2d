use crate::error::ChatError;
use std::time::Duration;

/// Connection state, readable at any time for UI status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; no attempt in flight.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and ready.
    Connected,
}

impl ConnectionState {
    /// Human-readable status string for UI display.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting…",
            ConnectionState::Connected => "Connected",
        }
    }
}

/// Connection events, delivered to every registered observer.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Successfully connected; queued messages drained and subscriptions
    /// replayed.
    Connected,
    /// Disconnected from the broker.
    Disconnected {
        /// Reason for disconnection.
        reason: DisconnectReason,
    },
    /// A reconnect attempt has been scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt runs.
        delay: Duration,
    },
    /// A scheduled reconnect attempt failed.
    ReconnectFailed {
        /// Error that caused the failure.
        error: ChatError,
    },
    /// Automatic recovery gave up; a fresh explicit `connect()` is required.
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
    /// The broker reported a protocol-level error while connected.
    BrokerError {
        /// Error detail from the broker.
        message: String,
    },
}

/// Reasons for disconnection.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// Client called `disconnect()`.
    ClientInitiated,
    /// The transport closed unexpectedly.
    TransportClosed,
}

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Initial reconnect wait; each subsequent attempt doubles it.
    pub reconnect_base_delay: Duration,
    /// Ceiling on consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
        }
    }
}

impl ManagerConfig {
    /// Sets the initial reconnect delay.
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Sets the maximum number of consecutive reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}
