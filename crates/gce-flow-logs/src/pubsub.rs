// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pub/Sub REST (v1) client covering what the processor needs: making sure the
//! subscription exists, pulling messages and settling them.

use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use crate::http;
use crate::token::TokenFactory;

/// One pulled message with its payload already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<RawReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: u32,
}

#[derive(Debug, Clone)]
pub struct PubSubClient {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    tokens: TokenFactory,
}

impl PubSubClient {
    /// `endpoint` is the API root, e.g. `https://pubsub.googleapis.com/v1`.
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        project_id: &str,
        tokens: TokenFactory,
    ) -> Self {
        PubSubClient {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            tokens,
        }
    }

    fn subscription_url(&self, subscription: &str) -> String {
        format!(
            "{}/projects/{}/subscriptions/{}",
            self.endpoint, self.project_id, subscription
        )
    }

    fn topic_name(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.project_id, topic)
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        Ok(match self.tokens.get_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    pub async fn subscription_exists(&self, subscription: &str) -> Result<bool, ApiError> {
        let url = self.subscription_url(subscription);
        let request = self.authorize(self.client.get(&url)).await?;
        let response = request.send().await.map_err(|source| ApiError::Request {
            url: url.clone(),
            source,
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        http::check_status(&url, response).await?;
        Ok(true)
    }

    pub async fn create_subscription(
        &self,
        subscription: &str,
        topic: &str,
    ) -> Result<(), ApiError> {
        let url = self.subscription_url(subscription);
        let body = json!({ "topic": self.topic_name(topic) });
        let request = self.authorize(self.client.put(&url).json(&body)).await?;
        http::send(&url, request).await?;
        Ok(())
    }

    /// Creates the subscription on `topic` unless it already exists.
    pub async fn ensure_subscription(
        &self,
        subscription: &str,
        topic: &str,
    ) -> Result<(), ApiError> {
        if self.subscription_exists(subscription).await? {
            debug!("Subscription {} already exists", subscription);
            return Ok(());
        }
        info!("Creating subscription {} on topic {}", subscription, topic);
        self.create_subscription(subscription, topic).await
    }

    pub async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
    ) -> Result<Vec<ReceivedMessage>, ApiError> {
        let url = format!("{}:pull", self.subscription_url(subscription));
        let request = self
            .authorize(self.client.post(&url).json(&PullRequest { max_messages }))
            .await?;
        let response: PullResponse = http::send(&url, request)
            .await?
            .json()
            .await
            .map_err(|source| ApiError::Body {
                url: url.clone(),
                source,
            })?;

        Ok(response
            .received_messages
            .into_iter()
            .map(|received| {
                let PubsubMessage { data, message_id } = received.message;
                let data = match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        // handed over as-is, the pipeline rejects and acks it
                        warn!("Message {} data is not valid base64: {}", message_id, e);
                        data.into_bytes()
                    }
                };
                ReceivedMessage {
                    ack_id: received.ack_id,
                    message_id,
                    data,
                }
            })
            .collect())
    }

    pub async fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: &[String],
    ) -> Result<(), ApiError> {
        let url = format!("{}:acknowledge", self.subscription_url(subscription));
        let body = json!({ "ackIds": ack_ids });
        let request = self.authorize(self.client.post(&url).json(&body)).await?;
        http::send(&url, request).await?;
        Ok(())
    }

    /// A deadline of zero makes the messages available for redelivery right away.
    pub async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: &[String],
        ack_deadline_seconds: u32,
    ) -> Result<(), ApiError> {
        let url = format!("{}:modifyAckDeadline", self.subscription_url(subscription));
        let body = ModifyAckDeadlineRequest {
            ack_ids,
            ack_deadline_seconds,
        };
        let request = self.authorize(self.client.post(&url).json(&body)).await?;
        http::send(&url, request).await?;
        Ok(())
    }
}
