//! Realtime chat client for a farm-to-market marketplace.
//!
//! The crate centers on [`BrokerClient`], a reconnecting pub/sub client for a
//! STOMP-over-WebSocket message broker. It keeps a destination-keyed
//! subscription registry and an outbound message queue so that consumers can
//! subscribe and publish without caring whether the connection is currently
//! up: subscriptions are replayed and queued messages drained, in order, after
//! every successful connect, and unexpected drops trigger exponential-backoff
//! reconnection.
//!
//! One client instance should be shared per process (it is `Clone`, handles
//! are cheap and refer to the same connection); creating a client per screen
//! defeats the single-connection design.
//!
//! The [`chat`] module layers the marketplace's message types and destinations
//! on top, and [`api`] covers the backend's REST side (history, conversation
//! lists, profiles).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use agrichat::{BrokerClient, ManagerConfig, WebSocketConfig};
//! use agrichat::chat::{self, SendMessage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ws = WebSocketConfig::from_env()?;
//!     let client = BrokerClient::over_websocket(ws, ManagerConfig::default());
//!     client.connect().await?;
//!
//!     client
//!         .subscribe(&chat::user_topic("42"), |frame| {
//!             println!("delivery: {}", frame.body);
//!         })
//!         .await;
//!
//!     let message = SendMessage {
//!         product_id: "p1".to_string(),
//!         sender_id: "42".to_string(),
//!         receiver_id: "7".to_string(),
//!         content: "Is this still available?".to_string(),
//!     };
//!     chat::send_message(&client, &message).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod chat;
pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

pub use api::{
    ApiConfig, ChatApi, ConversationSummary, ProductSummary, StartConversation, UserProfile,
};
pub use chat::{ChatMessage, MessageLog, SendMessage};
pub use client::{
    BrokerClient, ConnectionEvent, ConnectionState, DisconnectReason, ManagerConfig,
    OutboundMessage, SubscriptionHandle,
};
pub use error::{ChatError, Result};
pub use protocol::{Command, Frame};
pub use transport::{
    MockBehavior, MockController, MockTransport, Transport, TransportEvent, WebSocketConfig,
    WebSocketTransport,
};
