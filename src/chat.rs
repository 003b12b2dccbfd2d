//! Chat domain layer: message types, broker destinations, and the
//! optimistic-echo message log.
//!
//! Destinations follow the broker's routing scheme: every user has one inbox
//! topic carrying all of their conversations, and outbound messages go through
//! a single application destination.

use crate::client::BrokerClient;
use crate::error::Result;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application destination for outbound chat messages.
pub const SEND_DESTINATION: &str = "/app/chat.send";

/// Window within which a broker echo is matched against an optimistic local
/// message by sender and content.
pub const ECHO_MATCH_WINDOW: Duration = Duration::from_millis(1000);

/// Inbox topic for `user_id`, carrying every conversation they take part in.
#[must_use]
pub fn user_topic(user_id: &str) -> String {
    format!("/topic/user.{user_id}")
}

/// A chat message as delivered by the broker or the history API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned id; locally generated for optimistic messages until
    /// the broker echo replaces them.
    pub id: String,
    /// Product listing the conversation is about.
    pub product_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Outbound message payload published to [`SEND_DESTINATION`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub product_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

/// Publishes `message` over `client`.
///
/// Returns `Ok(true)` when the transport accepted the send immediately and
/// `Ok(false)` when the message was queued for the next connection.
///
/// # Errors
///
/// Returns an error only when the payload cannot be serialized.
pub async fn send_message<T: Transport + 'static>(
    client: &BrokerClient<T>,
    message: &SendMessage,
) -> Result<bool> {
    let body = serde_json::to_string(message)?;
    Ok(client.publish(SEND_DESTINATION, &body, &[]).await)
}

/// Ordered message log with optimistic-echo reconciliation.
///
/// A UI appends outbound messages immediately via [`push_local`] so the
/// conversation feels instant, then feeds every broker delivery through
/// [`apply`]. When the delivery is the echo of an optimistic message it
/// replaces that entry in place instead of producing a duplicate.
///
/// [`push_local`]: MessageLog::push_local
/// [`apply`]: MessageLog::apply
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    next_local_id: u64,
}

impl MessageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in display order, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Replaces the log contents with `history`, oldest first. Used when
    /// loading a conversation from the history API.
    pub fn load(&mut self, history: Vec<ChatMessage>) {
        self.messages = history;
    }

    /// Appends an optimistic outbound message and returns its local id.
    ///
    /// The id is only unique within this log; the broker echo carries the
    /// server-assigned id and supersedes it.
    pub fn push_local(&mut self, message: &SendMessage, now: DateTime<Utc>) -> String {
        self.next_local_id += 1;
        let id = format!("local-{}", self.next_local_id);
        self.messages.push(ChatMessage {
            id: id.clone(),
            product_id: message.product_id.clone(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            created_at: now,
        });
        id
    }

    /// Applies a broker delivery to the log.
    ///
    /// When `incoming` matches an existing entry, by id, or by sender and
    /// content with timestamps within [`ECHO_MATCH_WINDOW`], the entry is
    /// replaced in place. Otherwise the message is appended. Returns `true`
    /// when an entry was replaced.
    pub fn apply(&mut self, incoming: ChatMessage) -> bool {
        let position = self.messages.iter().position(|existing| {
            if existing.id == incoming.id {
                return true;
            }
            existing.sender_id == incoming.sender_id
                && existing.content == incoming.content
                && within_window(existing.created_at, incoming.created_at)
        });

        match position {
            Some(index) => {
                self.messages[index] = incoming;
                true
            }
            None => {
                self.messages.push(incoming);
                false
            }
        }
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Checks whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn within_window(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    let delta = (a - b).abs();
    delta.to_std().is_ok_and(|d| d <= ECHO_MATCH_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn send(content: &str) -> SendMessage {
        SendMessage {
            product_id: "p1".to_string(),
            sender_id: "buyer-1".to_string(),
            receiver_id: "farmer-1".to_string(),
            content: content.to_string(),
        }
    }

    fn delivered(id: &str, sender: &str, content: &str, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            product_id: "p1".to_string(),
            sender_id: sender.to_string(),
            receiver_id: "farmer-1".to_string(),
            content: content.to_string(),
            created_at: at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_user_topic() {
        assert_eq!(user_topic("42"), "/topic/user.42");
    }

    #[test]
    fn test_send_message_serializes_camel_case() {
        let json = serde_json::to_value(send("hello")).unwrap();
        assert_eq!(json["productId"], "p1");
        assert_eq!(json["senderId"], "buyer-1");
        assert_eq!(json["receiverId"], "farmer-1");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_echo_replaces_optimistic_entry() {
        let mut log = MessageLog::new();
        let local_id = log.push_local(&send("hello"), t0());

        let echo = delivered(
            "srv-9",
            "buyer-1",
            "hello",
            t0() + chrono::Duration::milliseconds(300),
        );
        assert!(log.apply(echo));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].id, "srv-9");
        assert_ne!(log.messages()[0].id, local_id);
    }

    #[test]
    fn test_echo_outside_window_appends() {
        let mut log = MessageLog::new();
        log.push_local(&send("hello"), t0());

        let late = delivered(
            "srv-9",
            "buyer-1",
            "hello",
            t0() + chrono::Duration::milliseconds(1500),
        );
        assert!(!log.apply(late));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_apply_matches_by_id() {
        let mut log = MessageLog::new();
        log.load(vec![delivered("srv-1", "farmer-1", "price?", t0())]);

        let updated = delivered("srv-1", "farmer-1", "price updated", t0());
        assert!(log.apply(updated));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].content, "price updated");
    }

    #[test]
    fn test_different_sender_same_content_appends() {
        let mut log = MessageLog::new();
        log.push_local(&send("ok"), t0());

        let other = delivered("srv-2", "farmer-1", "ok", t0());
        assert!(!log.apply(other));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_load_replaces_contents() {
        let mut log = MessageLog::new();
        log.push_local(&send("draft"), t0());
        log.load(vec![
            delivered("srv-1", "buyer-1", "hi", t0()),
            delivered("srv-2", "farmer-1", "hello", t0()),
        ]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.messages()[0].id, "srv-1");
    }
}
