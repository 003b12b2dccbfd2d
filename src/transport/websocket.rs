//! WebSocket transport for the broker protocol.
//!
//! Carries text frames over a single WebSocket connection: performs the
//! CONNECT/CONNECTED handshake, pumps inbound frames into the event stream,
//! and keeps the link warm with outgoing heartbeat frames.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agrichat::transport::{Transport, WebSocketConfig, WebSocketTransport};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WebSocketConfig::new("wss://broker.example.com/ws")?
//!     .with_timeout(Duration::from_secs(10))
//!     .with_header("Authorization", "Bearer token123");
//!
//! let mut transport = WebSocketTransport::new(config);
//! let _events = transport.connect().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{ChatError, Result};
use crate::protocol::{Command, Frame};
use crate::transport::{Transport, TransportEvent};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Default broker handshake timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default heartbeat interval, both directions, in milliseconds.
const DEFAULT_HEARTBEAT_MS: u64 = 4000;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Broker endpoint (ws:// or wss://).
    pub url: Url,
    /// Timeout covering socket connect plus broker handshake.
    pub timeout: Duration,
    /// Outgoing heartbeat interval in milliseconds (0 disables).
    pub heartbeat_outgoing_ms: u64,
    /// Heartbeat interval the broker is asked to honor, in milliseconds.
    pub heartbeat_incoming_ms: u64,
    /// Custom HTTP headers for the WebSocket upgrade (e.g. Authorization).
    pub headers: HashMap<String, String>,
}

impl WebSocketConfig {
    /// Creates a configuration for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or uses an unsupported scheme.
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "ws" | "wss" => {}
            scheme => {
                return Err(ChatError::InvalidEndpoint(format!(
                    "Unsupported WebSocket scheme: {scheme}. Use 'ws' or 'wss'"
                )));
            }
        }

        Ok(Self {
            url: parsed,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_outgoing_ms: DEFAULT_HEARTBEAT_MS,
            heartbeat_incoming_ms: DEFAULT_HEARTBEAT_MS,
            headers: HashMap::new(),
        })
    }

    /// Reads the configuration from the environment.
    ///
    /// `CHAT_BROKER_URL` is required; `CHAT_HEARTBEAT_MS` optionally overrides
    /// both heartbeat intervals.
    ///
    /// # Errors
    ///
    /// Returns an error if `CHAT_BROKER_URL` is unset or invalid.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("CHAT_BROKER_URL")
            .map_err(|_| ChatError::MissingConfig("CHAT_BROKER_URL".to_string()))?;
        let mut config = Self::new(&url)?;
        if let Ok(raw) = std::env::var("CHAT_HEARTBEAT_MS") {
            let ms = raw.parse::<u64>().map_err(|_| {
                ChatError::MissingConfig(format!("CHAT_HEARTBEAT_MS is not a number: {raw}"))
            })?;
            config.heartbeat_outgoing_ms = ms;
            config.heartbeat_incoming_ms = ms;
        }
        Ok(config)
    }

    /// Sets the connect-plus-handshake timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the heartbeat intervals (outgoing, incoming) in milliseconds.
    #[must_use]
    pub fn with_heartbeat(mut self, outgoing_ms: u64, incoming_ms: u64) -> Self {
        self.heartbeat_outgoing_ms = outgoing_ms;
        self.heartbeat_incoming_ms = incoming_ms;
        self
    }

    /// Adds a custom HTTP header to the upgrade request.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    fn vhost(&self) -> String {
        self.url.host_str().unwrap_or("localhost").to_string()
    }
}

/// WebSocket transport carrying broker frames.
///
/// One instance handles one connection at a time; `connect` after a drop
/// opens a fresh socket and runs the handshake again.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    writer: Option<Arc<Mutex<WsSink>>>,
    pump: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Creates a transport for the given configuration.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            writer: None,
            pump: None,
            heartbeat: None,
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    async fn open_socket(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ChatError::InvalidEndpoint(e.to_string()))?;
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ChatError::InvalidEndpoint(format!("Bad header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ChatError::InvalidEndpoint(format!("Bad header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| ChatError::ConnectionError(format!("WebSocket connect failed: {e}")))?;
        Ok(stream)
    }

    /// Reads until the broker acknowledges the session.
    async fn await_connected(source: &mut WsSource) -> Result<Frame> {
        while let Some(message) = source.next().await {
            let message =
                message.map_err(|e| ChatError::ConnectionError(format!("Handshake read: {e}")))?;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(ChatError::ConnectionError(
                        "Connection closed during handshake".to_string(),
                    ));
                }
                _ => continue,
            };
            if Frame::is_heartbeat(&text) {
                continue;
            }
            let frame = Frame::parse(&text)?;
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let detail = frame
                        .header("message")
                        .unwrap_or(frame.body.as_str())
                        .to_string();
                    return Err(ChatError::BrokerError(detail));
                }
                _ => continue,
            }
        }
        Err(ChatError::ConnectionError(
            "Connection closed during handshake".to_string(),
        ))
    }

    fn spawn_pump(&mut self, mut source: WsSource, tx: UnboundedSender<TransportEvent>) {
        self.pump = Some(tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if Frame::is_heartbeat(&text) {
                            continue;
                        }
                        match Frame::parse(&text) {
                            Ok(frame) => match frame.command {
                                Command::Message => {
                                    if tx.send(TransportEvent::Frame(frame)).is_err() {
                                        return;
                                    }
                                }
                                Command::Error => {
                                    let detail = frame
                                        .header("message")
                                        .unwrap_or(frame.body.as_str())
                                        .to_string();
                                    tracing::warn!(error = %detail, "Broker error frame");
                                    if tx
                                        .send(TransportEvent::Error(ChatError::BrokerError(detail)))
                                        .is_err()
                                    {
                                        return;
                                    }
                                }
                                other => {
                                    tracing::debug!(command = ?other, "Ignoring broker frame");
                                }
                            },
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping unparseable frame");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
            let _ = tx.send(TransportEvent::Closed);
        }));
    }

    fn spawn_heartbeat(&mut self, writer: Arc<Mutex<WsSink>>) {
        let interval_ms = self.config.heartbeat_outgoing_ms;
        if interval_ms == 0 {
            return;
        }
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.tick().await; // skip the immediate tick
            loop {
                ticker.tick().await;
                let mut sink = writer.lock().await;
                if sink.send(Message::Text("\n".to_string())).await.is_err() {
                    return;
                }
            }
        }));
    }
}

impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<UnboundedReceiver<TransportEvent>> {
        self.abort_tasks();
        self.writer = None;

        let handshake = async {
            let stream = self.open_socket().await?;
            let (mut sink, mut source) = stream.split();

            let connect = Frame::connect(
                &self.config.vhost(),
                (
                    self.config.heartbeat_outgoing_ms,
                    self.config.heartbeat_incoming_ms,
                ),
            );
            sink.send(Message::Text(connect.encode()))
                .await
                .map_err(|e| ChatError::ConnectionError(format!("Handshake write: {e}")))?;

            let connected = Self::await_connected(&mut source).await?;
            Ok::<_, ChatError>((sink, source, connected))
        };

        let (sink, source, connected) = tokio::time::timeout(self.config.timeout, handshake)
            .await
            .map_err(|_| ChatError::Timeout)??;

        tracing::info!(
            url = %self.config.url,
            session = connected.header("session").unwrap_or("-"),
            "Broker session established"
        );

        let writer = Arc::new(Mutex::new(sink));
        let (tx, rx) = mpsc::unbounded_channel();
        self.spawn_pump(source, tx);
        self.spawn_heartbeat(Arc::clone(&writer));
        self.writer = Some(writer);

        Ok(rx)
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        let writer = self.writer.as_ref().ok_or(ChatError::NotConnected)?;
        let mut sink = writer.lock().await;
        sink.send(Message::Text(frame.encode()))
            .await
            .map_err(|e| ChatError::ConnectionError(format!("WebSocket write failed: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        self.abort_tasks();
        if let Some(writer) = self.writer.take() {
            let mut sink = writer.lock().await;
            let _ = sink.send(Message::Text(Frame::disconnect().encode())).await;
            let _ = sink.send(Message::Close(None)).await;
        }
        Ok(())
    }
}
