use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors produced by the chat transport and its HTTP collaborators.
///
/// # Error Categories
///
/// - **I/O and Network**: `Io`, `ConnectionError`, `Timeout`, `NotConnected`
/// - **Protocol**: `ProtocolError`, `MalformedFrame`, `BrokerError`
/// - **Configuration**: `InvalidEndpoint`, `MissingConfig`
/// - **Data**: `Serialization`
/// - **HTTP**: `Http`
///
/// The enum is `Clone` so that the outcome of a shared connection attempt can
/// be handed to every caller that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout")]
    Timeout,

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        ChatError::InvalidEndpoint(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Http(err.to_string())
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ChatError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ChatError::ConnectionError(format!("Channel send error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = ChatError::ConnectionError("refused".to_string());
        assert_eq!(err.to_string(), "Connection error: refused");

        let err = ChatError::ReconnectExhausted { attempts: 5 };
        assert_eq!(
            err.to_string(),
            "Reconnect attempts exhausted after 5 tries"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: ChatError = io_err.into();
        match err {
            ChatError::Io(msg) => assert!(msg.contains("refused")),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_is_cloneable() {
        let err = ChatError::NotConnected;
        let copy = err.clone();
        assert_eq!(copy.to_string(), "Not connected");
    }
}
