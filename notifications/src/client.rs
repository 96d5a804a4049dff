/// HTTP transport for push topic subscriptions
///
/// Talks to an instance-id style relationship API: one device token is added to
/// or removed from a topic with `POST {endpoint}/iid/v1:batchAdd` and
/// `POST {endpoint}/iid/v1:batchRemove`.
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{NotificationError, NotificationResult};
use crate::topics::TopicSubscriptionClient;

const BATCH_ADD: &str = "batchAdd";
const BATCH_REMOVE: &str = "batchRemove";

/// Request body shared by both batch operations
#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    to: String,
    registration_tokens: [&'a str; 1],
}

#[derive(Debug, Default, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<BatchResult>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchResult {
    #[serde(default)]
    error: Option<String>,
}

/// Topic subscription client for a single device token
pub struct HttpTopicClient {
    client: Client,
    base_url: String,
    device_token: String,
    authorization: Option<String>,
}

impl HttpTopicClient {
    pub fn new(
        base_url: impl Into<String>,
        device_token: impl Into<String>,
        timeout: Duration,
    ) -> NotificationResult<Self> {
        let device_token = device_token.into();
        if device_token.trim().is_empty() {
            return Err(NotificationError::ValidationError(
                "Device token cannot be empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            NotificationError::TransportError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_token,
            authorization: None,
        })
    }

    /// Value sent verbatim in the `Authorization` header.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    async fn batch(&self, operation: &str, topic: &str) -> NotificationResult<()> {
        let url = format!("{}/iid/v1:{}", self.base_url, operation);
        let body = BatchRequest {
            to: format!("/topics/{}", topic),
            registration_tokens: [self.device_token.as_str()],
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(authorization) = &self.authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotificationError::TransportError(format!(
                "{} for {} returned {}: {}",
                operation, topic, status, detail
            )));
        }

        let parsed: BatchResponse = response.json().await?;
        if let Some(error) = parsed.results.iter().find_map(|r| r.error.as_deref()) {
            return Err(NotificationError::TransportError(format!(
                "{} for {} rejected: {}",
                operation, topic, error
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl TopicSubscriptionClient for HttpTopicClient {
    async fn subscribe_to_topic(&self, topic: &str) -> NotificationResult<()> {
        self.batch(BATCH_ADD, topic).await
    }

    async fn unsubscribe_from_topic(&self, topic: &str) -> NotificationResult<()> {
        self.batch(BATCH_REMOVE, topic).await
    }
}
