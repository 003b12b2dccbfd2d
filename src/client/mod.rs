//! Broker connection manager.
//!
//! One [`BrokerClient`] owns one logical connection to the chat broker and is
//! shared by every consumer in the process: handles are cheap clones over the
//! same state, so independent screens can subscribe and publish without
//! clobbering each other. The client hides transport-level reconnection from
//! callers that only want to subscribe to destinations and publish messages.

use crate::error::{ChatError, Result};
use crate::protocol::Frame;
use crate::transport::websocket::{WebSocketConfig, WebSocketTransport};
use crate::transport::{Transport, TransportEvent};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::instrument;

mod connection;

pub use self::connection::{ConnectionEvent, ConnectionState, DisconnectReason, ManagerConfig};

/// Callback invoked with every frame delivered for a subscribed destination.
pub type DeliveryCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Callback invoked with every connection event.
pub type ConnectionEventCallback = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// A live transport-level subscription.
///
/// Returned by [`BrokerClient::subscribe`] only while connected; a `None`
/// return still records the registration for replay after the next connect.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    /// Transport-level subscription id.
    pub id: u64,
    /// Destination the subscription is bound to.
    pub destination: String,
}

/// A message waiting in the outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub destination: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

struct SubscriptionEntry {
    id: u64,
    callback: DeliveryCallback,
}

struct Inner {
    config: ManagerConfig,
    state: ConnectionState,
    /// Destination-keyed registry; survives reconnects, cleared on disconnect.
    subscriptions: HashMap<String, SubscriptionEntry>,
    /// FIFO queue of messages accepted while not connected.
    queue: VecDeque<OutboundMessage>,
    /// Consecutive failed reconnect attempts since the last successful connect.
    reconnect_attempts: u32,
    reconnect_timer: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    /// Bumped on every successful connect and on disconnect; stale pump tasks
    /// and in-flight connect attempts compare against it.
    epoch: u64,
    next_subscription_id: u64,
    /// Outcome of the most recent connect attempt, shared with callers that
    /// were waiting on it.
    last_connect_error: Option<ChatError>,
}

/// Thread-safe broker connection manager.
///
/// # Examples
///
/// ```rust,no_run
/// use agrichat::client::{BrokerClient, ManagerConfig};
/// use agrichat::transport::WebSocketConfig;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ws = WebSocketConfig::new("wss://broker.example.com/ws")?;
///     let client = BrokerClient::over_websocket(ws, ManagerConfig::default());
///
///     client.connect().await?;
///
///     client
///         .subscribe("/topic/user.42", |frame| {
///             println!("chat event: {}", frame.body);
///         })
///         .await;
///
///     let delivered = client
///         .publish("/app/chat.send", r#"{"content":"hello"}"#, &[])
///         .await;
///     assert!(delivered);
///
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct BrokerClient<T: Transport> {
    /// Shared manager state. Never held across a transport handshake, so
    /// publish and subscribe stay responsive while a connect attempt is in
    /// flight.
    inner: Arc<RwLock<Inner>>,
    /// The transport, behind its own lock. Lock order is `inner` before
    /// `transport`; the handshake takes `transport` alone.
    transport: Arc<Mutex<T>>,
    /// Connection event observers; every registered callback sees every event.
    event_callbacks: Arc<RwLock<Vec<ConnectionEventCallback>>>,
    /// Serializes connection attempts so concurrent `connect()` calls share
    /// one transport connection.
    connect_mutex: Arc<Mutex<()>>,
    /// Incremented when a transport connect attempt resolves, so callers that
    /// queued behind an in-flight attempt can tell it completed while they
    /// waited.
    attempt_serial: Arc<AtomicU64>,
}

impl<T: Transport> Clone for BrokerClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            transport: Arc::clone(&self.transport),
            event_callbacks: Arc::clone(&self.event_callbacks),
            connect_mutex: Arc::clone(&self.connect_mutex),
            attempt_serial: Arc::clone(&self.attempt_serial),
        }
    }
}

impl BrokerClient<WebSocketTransport> {
    /// Creates a client over the production WebSocket transport.
    #[must_use]
    pub fn over_websocket(transport_config: WebSocketConfig, config: ManagerConfig) -> Self {
        Self::new(WebSocketTransport::new(transport_config), config)
    }
}

impl<T: Transport + 'static> BrokerClient<T> {
    /// Creates a client over the given transport.
    #[must_use]
    pub fn new(transport: T, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                config,
                state: ConnectionState::Disconnected,
                subscriptions: HashMap::new(),
                queue: VecDeque::new(),
                reconnect_attempts: 0,
                reconnect_timer: None,
                pump: None,
                epoch: 0,
                next_subscription_id: 1,
                last_connect_error: None,
            })),
            transport: Arc::new(Mutex::new(transport)),
            event_callbacks: Arc::new(RwLock::new(Vec::new())),
            connect_mutex: Arc::new(Mutex::new(())),
            attempt_serial: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    /// Checks whether the client is connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.read().await.state == ConnectionState::Connected
    }

    /// Number of messages waiting in the outbound queue.
    pub async fn queued_message_count(&self) -> usize {
        self.inner.read().await.queue.len()
    }

    /// Number of destinations in the subscription registry.
    pub async fn subscription_count(&self) -> usize {
        self.inner.read().await.subscriptions.len()
    }

    /// Registers a connection event observer.
    ///
    /// Every registered callback receives every event; registering a new one
    /// never displaces an earlier one.
    pub async fn on_connection_event<F>(&self, callback: F)
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        self.event_callbacks.write().await.push(Arc::new(callback));
    }

    async fn emit(&self, event: ConnectionEvent) {
        let callbacks = self.event_callbacks.read().await.clone();
        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// Connects to the broker.
    ///
    /// Idempotent: returns `Ok` immediately when already connected. When a
    /// connect attempt is already in flight, waits for it and shares its
    /// outcome instead of opening a second transport connection. On success
    /// the outbound queue is drained in order and every registered
    /// subscription is re-issued against the fresh transport.
    ///
    /// An explicit call resets the reconnect attempt counter, so recovery that
    /// previously gave up starts over from the base delay.
    ///
    /// # Errors
    ///
    /// Returns the transport or handshake error when the attempt fails; a
    /// reconnect is scheduled in that case as well.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<()> {
        let serial_before = self.attempt_serial.load(Ordering::SeqCst);
        let _guard = self.connect_mutex.lock().await;

        {
            let mut inner = self.inner.write().await;
            if inner.state == ConnectionState::Connected {
                return Ok(());
            }
            if self.attempt_serial.load(Ordering::SeqCst) > serial_before {
                // An attempt that was in flight when this call arrived has
                // resolved; share its outcome.
                return match inner.last_connect_error.clone() {
                    None => Ok(()),
                    Some(error) => Err(error),
                };
            }
            // Fresh explicit connect restarts the recovery budget.
            inner.reconnect_attempts = 0;
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }
        }

        self.try_connect().await
    }

    /// Runs one connect attempt. Caller must hold `connect_mutex`.
    ///
    /// Boxed because the scheduled-reconnect timer spawned on failure awaits
    /// this same future, and the recursion has to go through an explicit
    /// indirection.
    fn try_connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let start_epoch = {
                let mut inner = self.inner.write().await;
                inner.state = ConnectionState::Connecting;
                inner.epoch
            };

            // The handshake runs without the state lock; publishers and
            // subscribers observe `Connecting` and fall back to queuing.
            let connect_result = self.transport.lock().await.connect().await;

            let events = {
                let mut inner = self.inner.write().await;
                self.attempt_serial.fetch_add(1, Ordering::SeqCst);

                if inner.epoch != start_epoch {
                    // disconnect() ran mid-handshake; abandon the attempt and
                    // leave the state it established alone.
                    let error = ChatError::ConnectionError(
                        "Connect attempt cancelled by disconnect".to_string(),
                    );
                    inner.last_connect_error = Some(error.clone());
                    drop(inner);
                    if connect_result.is_ok() {
                        let _ = self.transport.lock().await.close().await;
                    }
                    return Err(error);
                }

                match connect_result {
                    Ok(events) => {
                        inner.state = ConnectionState::Connected;
                        inner.reconnect_attempts = 0;
                        inner.epoch += 1;
                        inner.last_connect_error = None;
                        if let Some(pump) = inner.pump.take() {
                            pump.abort();
                        }
                        events
                    }
                    Err(e) => {
                        inner.state = ConnectionState::Disconnected;
                        inner.last_connect_error = Some(e.clone());
                        drop(inner);
                        tracing::warn!(error = %e, "Broker connect failed");
                        self.schedule_reconnect().await;
                        return Err(e);
                    }
                }
            };

            let epoch = self.inner.read().await.epoch;
            self.spawn_pump(events, epoch).await;
            self.drain_queue().await;
            self.replay_subscriptions().await;

            tracing::info!("Connected to broker");
            self.emit(ConnectionEvent::Connected).await;
            Ok(())
        })
    }

    /// Tears down the connection and clears all manager-owned state.
    ///
    /// Cancels any pending reconnect, empties the subscription registry and
    /// the outbound queue. Idempotent and side-effect-free when already
    /// disconnected.
    pub async fn disconnect(&self) {
        let was_connected = {
            let mut inner = self.inner.write().await;
            inner.epoch += 1; // invalidate in-flight pump events and attempts
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }
            if let Some(pump) = inner.pump.take() {
                pump.abort();
            }
            let was_connected = inner.state == ConnectionState::Connected;
            inner.state = ConnectionState::Disconnected;
            inner.reconnect_attempts = 0;
            inner.subscriptions.clear();
            inner.queue.clear();
            was_connected
        };

        // Close outside the state lock; an in-flight handshake may hold the
        // transport.
        if let Err(e) = self.transport.lock().await.close().await {
            tracing::debug!(error = %e, "Transport close failed");
        }

        if was_connected {
            tracing::info!("Disconnected from broker");
            self.emit(ConnectionEvent::Disconnected {
                reason: DisconnectReason::ClientInitiated,
            })
            .await;
        }
    }

    /// Registers `callback` for `destination`, replacing any prior callback
    /// for the same destination.
    ///
    /// Returns a handle when a live subscription was issued; returns `None`
    /// while not connected (or when the live subscribe fails), in which case
    /// the registration is retained and replayed after the next successful
    /// connect. A `None` return is not a failure.
    pub async fn subscribe<F>(&self, destination: &str, callback: F) -> Option<SubscriptionHandle>
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().await;
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;

        let previous = inner.subscriptions.insert(
            destination.to_string(),
            SubscriptionEntry {
                id,
                callback: Arc::new(callback),
            },
        );

        if inner.state != ConnectionState::Connected {
            tracing::debug!(destination, "Not connected; subscription recorded for replay");
            return None;
        }

        let mut transport = self.transport.lock().await;

        // Drop the displaced live subscription so the old id stops delivering.
        if let Some(previous) = previous {
            if let Err(e) = transport.send(Frame::unsubscribe(previous.id)).await {
                tracing::debug!(error = %e, destination, "Stale unsubscribe failed");
            }
        }

        match transport.send(Frame::subscribe(id, destination)).await {
            Ok(()) => Some(SubscriptionHandle {
                id,
                destination: destination.to_string(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, destination, "Live subscribe failed; retained for replay");
                None
            }
        }
    }

    /// Removes `destination` from the registry.
    ///
    /// A live transport-level subscription is torn down as well when
    /// connected. Unsubscribing a destination that is not registered is a
    /// no-op.
    pub async fn unsubscribe(&self, destination: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.subscriptions.remove(destination) {
            if inner.state == ConnectionState::Connected {
                let result = self
                    .transport
                    .lock()
                    .await
                    .send(Frame::unsubscribe(entry.id))
                    .await;
                if let Err(e) = result {
                    tracing::debug!(error = %e, destination, "Live unsubscribe failed; will lapse on reconnect");
                }
            }
        }
    }

    /// Publishes `body` to `destination`.
    ///
    /// Returns `true` when the transport accepted the send immediately.
    /// While not connected, or when the send fails, the message is queued at
    /// the back of the outbound queue and `false` is returned; the boolean is
    /// the only signal of immediate-vs-deferred delivery, no error is raised.
    /// Never waits on an in-flight connect attempt.
    pub async fn publish(&self, destination: &str, body: &str, headers: &[(String, String)]) -> bool {
        let mut inner = self.inner.write().await;

        if inner.state != ConnectionState::Connected {
            inner.queue.push_back(OutboundMessage {
                destination: destination.to_string(),
                body: body.to_string(),
                headers: headers.to_vec(),
            });
            tracing::debug!(destination, queued = inner.queue.len(), "Not connected; message queued");
            return false;
        }

        let result = self
            .transport
            .lock()
            .await
            .send(Frame::send(destination, body, headers))
            .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, destination, "Publish failed; message queued");
                inner.queue.push_back(OutboundMessage {
                    destination: destination.to_string(),
                    body: body.to_string(),
                    headers: headers.to_vec(),
                });
                false
            }
        }
    }

    /// Drains the outbound queue in FIFO order.
    ///
    /// Stops at the first failed send and re-inserts that message at the
    /// front, so nothing is skipped or reordered past a failure. The state
    /// lock is held across each pop/send/re-queue step, so a concurrent
    /// `disconnect()` either sees the message back in the queue or the queue
    /// already cleared, never a resurrected message.
    async fn drain_queue(&self) {
        loop {
            let mut inner = self.inner.write().await;
            let message = match inner.queue.pop_front() {
                Some(message) => message,
                None => return,
            };

            let frame = Frame::send(&message.destination, &message.body, &message.headers);
            let result = self.transport.lock().await.send(frame).await;

            if let Err(e) = result {
                tracing::warn!(
                    error = %e,
                    destination = %message.destination,
                    "Queued send failed; halting drain"
                );
                inner.queue.push_front(message);
                return;
            }
            // Guard drops here, giving publishers a window between sends.
        }
    }

    /// Re-issues every registered subscription against the fresh transport.
    ///
    /// A destination that fails to replay is logged and skipped; the registry
    /// entry stays so the next reconnect tries again.
    async fn replay_subscriptions(&self) {
        let entries: Vec<(String, u64)> = {
            let inner = self.inner.read().await;
            inner
                .subscriptions
                .iter()
                .map(|(destination, entry)| (destination.clone(), entry.id))
                .collect()
        };

        for (destination, id) in entries {
            let result = self
                .transport
                .lock()
                .await
                .send(Frame::subscribe(id, &destination))
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, destination = %destination, "Subscription replay failed");
            }
        }
    }

    async fn spawn_pump(&self, mut events: UnboundedReceiver<TransportEvent>, epoch: u64) {
        let client = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Frame(frame) => client.dispatch(frame).await,
                    TransportEvent::Error(e) => {
                        tracing::warn!(error = %e, "Broker reported an error");
                        client
                            .emit(ConnectionEvent::BrokerError {
                                message: e.to_string(),
                            })
                            .await;
                    }
                    TransportEvent::Closed => {
                        client.handle_transport_closed(epoch).await;
                        return;
                    }
                }
            }
            // Stream ended without an explicit Closed: same thing.
            client.handle_transport_closed(epoch).await;
        });
        self.inner.write().await.pump = Some(handle);
    }

    async fn dispatch(&self, frame: Frame) {
        let callback = {
            let inner = self.inner.read().await;
            frame
                .destination()
                .and_then(|destination| inner.subscriptions.get(destination))
                .map(|entry| Arc::clone(&entry.callback))
        };
        match callback {
            Some(callback) => callback(frame),
            None => {
                tracing::debug!(
                    destination = frame.destination().unwrap_or("-"),
                    "No subscriber for delivered frame"
                );
            }
        }
    }

    /// Handles an unexpected transport drop observed by the pump for `epoch`.
    async fn handle_transport_closed(&self, epoch: u64) {
        {
            let mut inner = self.inner.write().await;
            if inner.epoch != epoch || inner.state != ConnectionState::Connected {
                return; // stale pump, or already handled
            }
            inner.state = ConnectionState::Disconnected;
        }

        tracing::warn!("Connection to broker lost");
        self.emit(ConnectionEvent::Disconnected {
            reason: DisconnectReason::TransportClosed,
        })
        .await;
        self.schedule_reconnect().await;
    }

    /// Schedules the next reconnect attempt, or gives up once the attempt
    /// counter has reached the configured maximum.
    ///
    /// The counter is incremented before the delay is computed, giving the
    /// sequence `D, 2D, 4D, 8D, 16D` for attempts 1–5 with base delay `D`.
    async fn schedule_reconnect(&self) {
        let (attempt, delay) = {
            let mut inner = self.inner.write().await;
            if inner.reconnect_attempts >= inner.config.max_reconnect_attempts {
                let attempts = inner.reconnect_attempts;
                drop(inner);
                tracing::error!(attempts, "Max reconnect attempts reached");
                self.emit(ConnectionEvent::ReconnectExhausted { attempts })
                    .await;
                return;
            }
            inner.reconnect_attempts += 1;
            let attempt = inner.reconnect_attempts;
            let factor = 1u32 << (attempt - 1).min(16);
            (attempt, inner.config.reconnect_base_delay * factor)
        };

        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.emit(ConnectionEvent::Reconnecting { attempt, delay })
            .await;

        let client = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _guard = client.connect_mutex.lock().await;
            if client.state().await != ConnectionState::Disconnected {
                return; // connected (or connecting) in the meantime
            }
            if let Err(error) = client.try_connect().await {
                client.emit(ConnectionEvent::ReconnectFailed { error }).await;
            }
        });

        // The previous timer, if any, has already fired; just replace it.
        self.inner.write().await.reconnect_timer = Some(timer);
    }
}
