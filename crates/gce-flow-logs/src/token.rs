// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::ApiError;
use crate::metadata::MetadataClient;

// Refresh a bit before the metadata server would
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Source of the bearer token sent with Pub/Sub requests.
#[derive(Clone)]
pub enum TokenFactory {
    /// Pub/Sub emulator, no credentials
    Anonymous,
    Static(String),
    Metadata {
        metadata: MetadataClient,
        cached: Arc<Mutex<Option<CachedToken>>>,
    },
}

impl TokenFactory {
    pub fn new_anonymous() -> Self {
        Self::Anonymous
    }

    pub fn new_from_static_token(token: &str) -> Self {
        Self::Static(token.to_string())
    }

    pub fn new_from_metadata(metadata: MetadataClient) -> Self {
        Self::Metadata {
            metadata,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns `None` when requests go out unauthenticated.
    pub async fn get_token(&self) -> Result<Option<String>, ApiError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::Metadata { metadata, cached } => {
                let mut cached = cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() + EXPIRY_MARGIN < token.expires_at {
                        return Ok(Some(token.token.clone()));
                    }
                }
                let fresh = metadata.access_token().await?;
                debug!(
                    "Refreshed {} access token, expires in {}s",
                    fresh.token_type, fresh.expires_in
                );
                let token = fresh.access_token;
                *cached = Some(CachedToken {
                    token: token.clone(),
                    expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
                });
                Ok(Some(token))
            }
        }
    }
}

impl Debug for TokenFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "TokenFactory::Anonymous"),
            Self::Static(_) => write!(f, "TokenFactory::Static"),
            Self::Metadata { .. } => write!(f, "TokenFactory::Metadata"),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use mockito::Server;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn anonymous() {
        assert_eq!(TokenFactory::new_anonymous().get_token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn new_from_static_token() {
        let tokens = TokenFactory::new_from_static_token("mock-token");
        assert_eq!(
            tokens.get_token().await.unwrap().as_deref(),
            Some("mock-token")
        );
        assert_eq!(format!("{tokens:?}"), "TokenFactory::Static");
    }

    #[tokio::test]
    #[traced_test]
    async fn metadata_token_is_cached() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/computeMetadata/v1/instance/service-accounts/default/token",
            )
            .with_status(200)
            .with_body(
                r#"{"access_token":"ya29.cached","expires_in":3599,"token_type":"Bearer"}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let tokens = TokenFactory::new_from_metadata(MetadataClient::new(
            reqwest::Client::new(),
            &server.url(),
        ));
        for _ in 0..3 {
            assert_eq!(
                tokens.get_token().await.unwrap().as_deref(),
                Some("ya29.cached")
            );
        }
        mock.assert_async().await;
        assert!(logs_contain("Refreshed Bearer access token, expires in 3599s"));
    }

    #[tokio::test]
    async fn metadata_token_close_to_expiry_is_refreshed() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/computeMetadata/v1/instance/service-accounts/default/token",
            )
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.short","expires_in":30}"#)
            .expect(2)
            .create_async()
            .await;

        let tokens = TokenFactory::new_from_metadata(MetadataClient::new(
            reqwest::Client::new(),
            &server.url(),
        ));
        tokens.get_token().await.unwrap();
        tokens.get_token().await.unwrap();
        mock.assert_async().await;
    }
}
