use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Header carrying the provider auth key, when configured.
const AUTH_HEADER: &str = "x-ins-auth-key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// What the provider gave us back for a delivered message.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub message_id: String,
    pub raw_response: String,
}

/// A failed send attempt. The raw provider body is kept where one exists
/// so the caller can persist it alongside the FAILED status.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("webhook request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    #[error("webhook returned non-2xx status: {status}")]
    Status {
        status: reqwest::StatusCode,
        raw: String,
    },
    #[error("failed to parse webhook response: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        raw: String,
    },
    #[error("webhook response missing messageId")]
    MissingMessageId { raw: String },
}

impl SendError {
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            SendError::Request { .. } => None,
            SendError::Status { raw, .. }
            | SendError::Decode { raw, .. }
            | SendError::MissingMessageId { raw } => Some(raw),
        }
    }
}

/// Contract for an SMS provider implementation.
#[async_trait::async_trait]
pub trait SmsClient: Send + Sync {
    /// Sends an SMS to the given recipient and returns the provider receipt.
    async fn send(&self, to: &str, content: &str) -> Result<Receipt, SendError>;

    /// Checks whether the provider is reachable and usable.
    async fn health(&self) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookRequest<'a> {
    to: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WebhookResponse {
    #[serde(rename = "messageId", default)]
    message_id: String,
}

/// SMS client that posts messages to a webhook-style HTTP endpoint.
pub struct WebhookClient {
    client: Client,
    endpoint: String,
    auth_key: String,
}

impl WebhookClient {
    pub fn new(endpoint: &str, auth_key: &str) -> Result<Self> {
        // Backstop timeout; per-message budgets are enforced by the caller.
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_key: auth_key.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl SmsClient for WebhookClient {
    async fn send(&self, to: &str, content: &str) -> Result<Receipt, SendError> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .json(&WebhookRequest { to, content });
        if !self.auth_key.is_empty() {
            req = req.header(AUTH_HEADER, &self.auth_key);
        }

        let response = req
            .send()
            .await
            .map_err(|source| SendError::Request { source })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|source| SendError::Request { source })?;

        if !status.is_success() {
            return Err(SendError::Status { status, raw });
        }

        let parsed: WebhookResponse = serde_json::from_str(&raw)
            .map_err(|source| SendError::Decode { source, raw: raw.clone() })?;

        if parsed.message_id.is_empty() {
            return Err(SendError::MissingMessageId { raw });
        }

        Ok(Receipt {
            message_id: parsed.message_id,
            raw_response: raw,
        })
    }

    async fn health(&self) -> Result<()> {
        let mut req = self.client.get(&self.endpoint).timeout(HEALTH_TIMEOUT);
        if !self.auth_key.is_empty() {
            req = req.header(AUTH_HEADER, &self.auth_key);
        }

        let response = req.send().await.context("Provider health request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Provider health returned non-2xx status: {status}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_send_parses_receipt() {
        let url = serve(Router::new().route(
            "/",
            post(|| async {
                Json(serde_json::json!({"message": "Accepted", "messageId": "ext-42"}))
            }),
        ))
        .await;

        let client = WebhookClient::new(&url, "secret").unwrap();
        let receipt = client.send("+905551112233", "hello").await.unwrap();
        assert_eq!(receipt.message_id, "ext-42");
        assert!(receipt.raw_response.contains("Accepted"));
    }

    #[tokio::test]
    async fn test_send_non_2xx_keeps_raw_body() {
        let url = serve(Router::new().route(
            "/",
            post(|| async {
                (
                    axum::http::StatusCode::SERVICE_UNAVAILABLE,
                    "provider down",
                )
            }),
        ))
        .await;

        let client = WebhookClient::new(&url, "").unwrap();
        let err = client.send("+905551112233", "hello").await.unwrap_err();
        assert_eq!(err.raw_response(), Some("provider down"));
        assert!(matches!(err, SendError::Status { .. }));
    }

    #[tokio::test]
    async fn test_send_rejects_missing_message_id() {
        let url = serve(Router::new().route(
            "/",
            post(|| async { Json(serde_json::json!({"message": "Accepted"})) }),
        ))
        .await;

        let client = WebhookClient::new(&url, "").unwrap();
        let err = client.send("+905551112233", "hello").await.unwrap_err();
        assert!(matches!(err, SendError::MissingMessageId { .. }));
        assert!(err.raw_response().unwrap().contains("Accepted"));
    }

    #[tokio::test]
    async fn test_health_checks_status() {
        let ok_url = serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let client = WebhookClient::new(&ok_url, "").unwrap();
        assert!(client.health().await.is_ok());

        let bad_url = serve(Router::new().route(
            "/",
            get(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let client = WebhookClient::new(&bad_url, "").unwrap();
        assert!(client.health().await.is_err());
    }
}
