//! reqwest-backed [`Backend`].

use std::time::Duration;

use serde_json::Value;
use url::Url;

use ecodeli_proto::message::{Message, MessageId};
use ecodeli_proto::rest::{self, ConversationSummary};
use ecodeli_proto::user::User;

use super::{ApiError, Backend};

const CONVERSATIONS: &str = "messages/conversations";
const INBOX: &str = "messages/inbox";
const AVAILABLE_USERS: &str = "messages/available-users";

/// Settings for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// API root, e.g. `https://api.ecodeli.example/api`.
    pub base_url: String,
    /// Sent as a bearer token when present.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// REST client for the messaging endpoints.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    auth_token: Option<String>,
}

impl HttpBackend {
    /// Builds a client for `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the base URL does not parse, or
    /// [`ApiError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, ApiError> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Request {
                endpoint: base.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base,
            auth_token: config.auth_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(format!("{path}: {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, path: &str, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let failed = |e: reqwest::Error| ApiError::Request {
            endpoint: path.to_string(),
            reason: e.to_string(),
        };
        let response = self.authorize(request).send().await.map_err(failed)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(failed)
    }

    /// GETs `path` and parses the body as JSON. A body that is not JSON is
    /// logged and treated as `null`, which every `rest::parse_*` maps to an
    /// empty result.
    async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        let url = self.endpoint(path)?;
        let body = self.send(path, self.client.get(url)).await?;
        Ok(serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::warn!(endpoint = path, error = %e, "response is not JSON, treating as empty");
            Value::Null
        }))
    }
}

impl Backend for HttpBackend {
    async fn fetch_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let payload = self.get_json(CONVERSATIONS).await?;
        let rows = rest::parse_conversations(&payload);
        tracing::debug!(count = rows.len(), "fetched conversation summaries");
        Ok(rows)
    }

    async fn fetch_inbox(&self) -> Result<Vec<Message>, ApiError> {
        let payload = self.get_json(INBOX).await?;
        let messages = rest::parse_messages(&payload);
        tracing::debug!(count = messages.len(), "fetched inbox");
        Ok(messages)
    }

    async fn mark_read(&self, message_id: MessageId) -> Result<(), ApiError> {
        let path = format!("messages/{message_id}/read");
        let url = self.endpoint(&path)?;
        self.send(&path, self.client.put(url)).await?;
        Ok(())
    }

    async fn fetch_available_users(&self) -> Result<Vec<User>, ApiError> {
        let payload = self.get_json(AVAILABLE_USERS).await?;
        Ok(rest::parse_users(&payload))
    }
}
