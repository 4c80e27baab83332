//! REST API client
//!
//! Covers the two calls the gateway client needs: discovering the gateway
//! URL and posting messages (replies included).

use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RestConfig;
use crate::error::{Error, Result};
use crate::models::Message;

/// Authenticated REST client
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: String,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_reference: Option<MessageReference<'a>>,
}

#[derive(Debug, Serialize)]
struct MessageReference<'a> {
    message_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: f64,
}

impl RestClient {
    /// Create a client authenticating as a bot
    pub fn new(token: &SecretString, config: &RestConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut authorization = header::HeaderValue::from_str(&format!("Bot {}", token.expose_secret()))
            .map_err(|e| Error::Config(format!("Invalid token format: {}", e)))?;
        authorization.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, authorization);

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(format!("{} ({})", crate::NAME, crate::VERSION))
            .timeout(config.timeout)
            .build()?;

        Ok(RestClient {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Ask the API which gateway URL to connect to
    pub async fn gateway_url(&self) -> Result<String> {
        let url = format!("{}/gateway/bot", self.api_base);
        debug!("Fetching gateway URL from {}", url);

        let response = self.client.get(&url).send().await?;
        let body: GatewayResponse = Self::check(response).await?.json().await?;
        Ok(body.url)
    }

    /// Post a message, optionally as a reply to another message
    pub async fn send_message(&self, channel_id: &str, content: &str, reply_to: Option<&str>) -> Result<Message> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let body = CreateMessage {
            content,
            message_reference: reply_to.map(|message_id| MessageReference { message_id }),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = serde_json::from_str::<RateLimitBody>(&error_text)
                    .map(|body| body.retry_after)
                    .unwrap_or_default();
                warn!("REST rate limit hit, retry after {}s", retry_after);
                Err(Error::RateLimited(format!("retry after {}s", retry_after)))
            }
            StatusCode::UNAUTHORIZED => Err(Error::FatalConfig("Invalid token".to_string())),
            _ => Err(Error::Api {
                status: status.as_u16(),
                message: error_text,
            }),
        }
    }
}
