// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal client for the GCE metadata server: project id and service account tokens.

use serde::Deserialize;
use tracing::debug;

use crate::errors::ApiError;
use crate::http;

const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");
const PROJECT_ID_PATH: &str = "/computeMetadata/v1/project/project-id";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// OAuth2 access token handed out by the metadata server.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Seconds until the token expires
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    /// `host` is `host[:port]` as found in `GCE_METADATA_HOST`.
    pub fn new(client: reqwest::Client, host: &str) -> Self {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        MetadataClient { client, base_url }
    }

    pub async fn project_id(&self) -> Result<String, ApiError> {
        let url = format!("{}{}", self.base_url, PROJECT_ID_PATH);
        let response = http::send(
            &url,
            self.client.get(&url).header(METADATA_FLAVOR.0, METADATA_FLAVOR.1),
        )
        .await?;
        let project_id = response.text().await.map_err(|source| ApiError::Body {
            url: url.clone(),
            source,
        })?;
        debug!("Metadata server reports project id {}", project_id.trim());
        Ok(project_id.trim().to_string())
    }

    pub async fn access_token(&self) -> Result<AccessToken, ApiError> {
        let url = format!("{}{}", self.base_url, TOKEN_PATH);
        let response = http::send(
            &url,
            self.client.get(&url).header(METADATA_FLAVOR.0, METADATA_FLAVOR.1),
        )
        .await?;
        response
            .json::<AccessToken>()
            .await
            .map_err(|source| ApiError::Body { url, source })
    }
}
