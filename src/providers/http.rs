//! HTTP implementations of the chat backend and relay-token source.

use crate::error::{Result, WidgetError};
use crate::providers::{ChatBackend, RelayCredentials, RelayTokenSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Header carrying the speech-service subscription key.
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    session_id: &'a str,
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<String>,
}

/// Chat backend reached with a JSON POST of `{session_id, query}`.
///
/// A non-2xx answer becomes [`WidgetError::Backend`] carrying the status
/// code and the raw response body.
pub struct HttpChatBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpChatBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Use a caller-configured client (timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn ask(&self, session_id: &str, query: &str) -> Result<String> {
        debug!(url = %self.url, "sending chat request");
        let response = self
            .client
            .post(&self.url)
            .json(&ChatRequest { session_id, query })
            .send()
            .await?;

        let status = response.status();
        info!(status = status.as_u16(), "chat backend responded");
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WidgetError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await?;
        Ok(body.message.unwrap_or_default())
    }
}

#[derive(Debug, Deserialize)]
struct RelayTokenResponse {
    #[serde(rename = "Urls")]
    urls: Vec<String>,
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Password")]
    password: String,
}

/// Fetches relay credentials with a subscription-key GET.
pub struct HttpRelayTokenSource {
    client: reqwest::Client,
    url: String,
    subscription_key: String,
}

impl HttpRelayTokenSource {
    pub fn new(url: impl Into<String>, subscription_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            subscription_key: subscription_key.into(),
        }
    }

    /// Build from the speech section of the widget config.
    pub fn from_config(config: &crate::config::SpeechServiceConfig) -> Self {
        Self::new(config.relay_token_url(), config.subscription_key.clone())
    }
}

#[async_trait]
impl RelayTokenSource for HttpRelayTokenSource {
    async fn fetch(&self) -> Result<RelayCredentials> {
        let response = self
            .client
            .get(&self.url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WidgetError::Credentials {
                status: status.as_u16(),
                message,
            });
        }

        let token: RelayTokenResponse = response.json().await?;
        let url = token
            .urls
            .into_iter()
            .next()
            .ok_or_else(|| WidgetError::Startup("relay token carried no relay URL".to_owned()))?;
        info!("relay token fetched");
        Ok(RelayCredentials {
            url,
            username: token.username,
            credential: token.password,
        })
    }
}
