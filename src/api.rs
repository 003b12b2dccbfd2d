//! REST client for the chat backend.
//!
//! The broker delivers live messages; everything historical (conversation
//! lists, message history, user profiles) comes over plain HTTP from the same
//! backend.

use crate::chat::ChatMessage;
use crate::error::{ChatError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// REST client configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Backend base URL, e.g. `https://backend.example.com`.
    pub base_url: Url,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Bearer token attached to every request when present.
    pub bearer_token: Option<String>,
}

impl ApiConfig {
    /// Creates a configuration for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidEndpoint`] when `base_url` is not a valid
    /// `http` or `https` URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        match base_url.scheme() {
            "http" | "https" => Ok(Self {
                base_url,
                timeout: Duration::from_secs(10),
                bearer_token: None,
            }),
            other => Err(ChatError::InvalidEndpoint(format!(
                "Expected http or https URL, got scheme '{other}'"
            ))),
        }
    }

    /// Reads the configuration from the environment.
    ///
    /// `CHAT_API_URL` is required; `CHAT_API_TOKEN` is optional.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MissingConfig`] when `CHAT_API_URL` is unset and
    /// [`ChatError::InvalidEndpoint`] when it does not parse.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("CHAT_API_URL")
            .map_err(|_| ChatError::MissingConfig("CHAT_API_URL".to_string()))?;
        let mut config = Self::new(&base_url)?;
        config.bearer_token = std::env::var("CHAT_API_TOKEN").ok();
        Ok(config)
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// One conversation in a farmer's inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub buyer_id: String,
    pub product_id: String,
    pub buyer_name: String,
    pub product_name: String,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub unread_count: u32,
}

/// A user profile as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A product listing as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub farmer_id: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// Payload for creating a conversation record before the first message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversation {
    pub product_id: String,
    pub farmer_id: String,
    pub buyer_id: String,
}

/// Chat backend REST client.
#[derive(Debug, Clone)]
pub struct ChatApi {
    config: ApiConfig,
    http: reqwest::Client,
}

impl ChatApi {
    /// Creates a client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| ChatError::InvalidEndpoint(e.to_string()))
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.http.post(url);
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Message history for one buyer/farmer/product conversation, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn history(
        &self,
        product_id: &str,
        buyer_id: &str,
        farmer_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let mut url = self.endpoint("/api/chat/history")?;
        url.query_pairs_mut()
            .append_pair("productId", product_id)
            .append_pair("buyerId", buyer_id)
            .append_pair("farmerId", farmer_id);

        let response = self.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// All conversations in `farmer_id`'s inbox, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn conversations(&self, farmer_id: &str) -> Result<Vec<ConversationSummary>> {
        let mut url = self.endpoint("/api/chat/conversations")?;
        url.query_pairs_mut().append_pair("farmerId", farmer_id);

        let response = self.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Creates the conversation record ahead of the first message.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn start_conversation(&self, request: &StartConversation) -> Result<()> {
        let url = self.endpoint("/api/chat/start-conversation")?;
        self.post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fetches the profile for `user_id`. Used to show the counterpart's
    /// name in a conversation header.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn user(&self, user_id: &str) -> Result<UserProfile> {
        let url = self.endpoint(&format!("/api/users/{user_id}"))?;
        let response = self.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Fetches the listing a conversation is about.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn product(&self, product_id: &str) -> Result<ProductSummary> {
        let url = self.endpoint(&format!("/api/products/{product_id}"))?;
        let response = self.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
