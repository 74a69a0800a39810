// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP helpers shared by the Pub/Sub and metadata clients.

use core::time::Duration;

use reqwest::Response;

use crate::errors::ApiError;

/// Builds the reqwest client used for Google APIs.
///
/// `timeout` bounds a whole request, long-polling pulls included.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
        .map_err(ApiError::Client)
}

/// Sends the request and turns non-2xx answers into [`ApiError::Status`].
pub(crate) async fn send(
    url: &str,
    request: reqwest::RequestBuilder,
) -> Result<Response, ApiError> {
    let response = request.send().await.map_err(|source| ApiError::Request {
        url: url.to_string(),
        source,
    })?;
    check_status(url, response).await
}

pub(crate) async fn check_status(url: &str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        url: url.to_string(),
        status,
        body,
    })
}
