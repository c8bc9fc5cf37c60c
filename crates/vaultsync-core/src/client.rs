//! Shared HTTP client used by the directory and portal adapters

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{Result, VaultSyncError};

/// Thin wrapper over `reqwest::Client` that maps failures onto
/// [`VaultSyncError`].
///
/// Requests are sent once. A retry would repeat non-idempotent writes
/// against the portal, so callers decide whether to try again.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                VaultSyncError::config_error(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send the request and return the response whatever its status
    pub async fn execute(&self, request_builder: RequestBuilder) -> Result<Response> {
        request_builder
            .send()
            .await
            .map_err(|e| VaultSyncError::transport_error(e.to_string()))
    }

    /// Send the request and turn any non-2xx status into an upstream error
    pub async fn execute_expecting_success(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response> {
        let response = self.execute(request_builder).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(VaultSyncError::upstream(
            status,
            format!("HTTP {} - {}", status, body),
        ))
    }
}

/// Read a response body as JSON
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response
        .text()
        .await
        .map_err(|e| VaultSyncError::transport_error(e.to_string()))?;
    serde_json::from_str(&body)
        .map_err(|e| VaultSyncError::parse_error(format!("Invalid JSON response: {}", e)))
}
