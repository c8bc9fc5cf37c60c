//! Credential portal client

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use vaultsync_core::client::{read_json, HttpClient};
use vaultsync_core::{
    AccessKeyId, AccessKeySecret, AccountId, CredentialPortal, RequestContext, Result,
    RotateRequest, VaultSyncError,
};

use crate::config::PortalConfig;

#[derive(Debug, Serialize)]
struct AppRoleLogin<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AppRoleResponse {
    auth: Option<AppRoleAuth>,
}

#[derive(Debug, Deserialize)]
struct AppRoleAuth {
    client_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest<'a> {
    user_name: &'a str,
    account_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteKeyRequest<'a> {
    access_key_id: &'a str,
    account_id: &'a str,
    user_name: &'a str,
}

/// Key material as the portal returns it; the account id is not echoed
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PortalSecretResponse {
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    access_key_secret: String,
    #[serde(default)]
    expiry_date_epoch: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    create_date: Option<String>,
}

impl PortalSecretResponse {
    pub(crate) fn into_secret(self, account_id: &AccountId, requested_user: &str) -> Result<AccessKeySecret> {
        let access_key_id = AccessKeyId::non_empty(self.access_key_id).ok_or_else(|| {
            VaultSyncError::parse_error("Portal response carries no accessKeyId")
        })?;
        let user_name = if self.user_name.is_empty() {
            requested_user.to_string()
        } else {
            self.user_name
        };

        Ok(AccessKeySecret {
            account_id: account_id.clone(),
            user_name,
            access_key_id,
            access_key_secret: self.access_key_secret,
            expiry_date_epoch: self.expiry_date_epoch,
            status: self.status,
            create_date: self.create_date,
        })
    }
}

/// App-role authenticated client for the credential portal.
///
/// Each call fetches a fresh short-lived token; nothing is cached.
pub struct PortalClient {
    config: PortalConfig,
    http_client: HttpClient,
}

impl PortalClient {
    pub fn new(config: PortalConfig, timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(config, HttpClient::new(timeout)?))
    }

    pub fn with_client(config: PortalConfig, http_client: HttpClient) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn require_endpoint(&self, operation: &str, path: &str) -> Result<String> {
        self.config.endpoint(path).ok_or_else(|| {
            VaultSyncError::config_error(format!("Portal endpoint for {} is not configured", operation))
        })
    }

    /// Obtain a service-to-service token from the portal's app-role login
    async fn app_role_token(&self) -> Result<String> {
        if self.config.auth_endpoint.is_empty() {
            return Err(VaultSyncError::config_error("Portal auth endpoint is not configured"));
        }
        if self.config.role_id.is_empty() || self.config.secret_id.is_empty() {
            return Err(VaultSyncError::config_error("Portal app-role credentials are not configured"));
        }

        let login = AppRoleLogin {
            role_id: &self.config.role_id,
            secret_id: &self.config.secret_id,
        };
        let request = self
            .http_client
            .inner()
            .post(&self.config.auth_endpoint)
            .header("Accept", "application/json")
            .json(&login);
        let response = self.http_client.execute_expecting_success(request).await?;
        let body: AppRoleResponse = read_json(response).await?;

        body.auth
            .and_then(|auth| auth.client_token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| VaultSyncError::config_error("Portal app-role login returned no token"))
    }

    pub(crate) fn authorization(&self, token: &str) -> String {
        format!("{} {}", self.config.auth_header_prefix, STANDARD.encode(token))
    }

    /// Validate the endpoint, then authenticate, then send
    async fn authorized_request(
        &self,
        operation: &str,
        path: &str,
        method: reqwest::Method,
        body: &(impl Serialize + Sync),
    ) -> Result<reqwest::Response> {
        let url = self.require_endpoint(operation, path)?;
        let token = self.app_role_token().await?;

        let request = self
            .http_client
            .inner()
            .request(method, url)
            .header("Authorization", self.authorization(&token))
            .header("Accept", "application/json")
            .json(body);
        self.http_client.execute(request).await
    }

    async fn read_secret(
        &self,
        operation: &str,
        response: reqwest::Response,
        account_id: &AccountId,
        user_name: &str,
    ) -> Result<AccessKeySecret> {
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(operation, status = status.as_u16(), "Portal rejected request");
            return Err(VaultSyncError::upstream(
                status,
                format!("{} failed: {}", operation, body),
            ));
        }

        let body: PortalSecretResponse = read_json(response).await?;
        body.into_secret(account_id, user_name)
    }
}

#[async_trait]
impl CredentialPortal for PortalClient {
    #[instrument(skip(self, ctx), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn create_access_key(
        &self,
        ctx: &RequestContext,
        account_id: &AccountId,
        user_name: &str,
    ) -> Result<AccessKeySecret> {
        let body = CreateKeyRequest {
            user_name,
            account_id: account_id.as_str(),
        };
        let response = self
            .authorized_request(
                "create access key",
                &self.config.create_key_endpoint,
                reqwest::Method::POST,
                &body,
            )
            .await?;

        let secret = self
            .read_secret("Create access key", response, account_id, user_name)
            .await?;
        info!(access_key_id = %secret.access_key_id, "Created access key");
        Ok(secret)
    }

    #[instrument(skip(self, ctx, request), fields(user = %ctx.user, request_id = %ctx.request_id, access_key_id = %request.access_key_id))]
    async fn rotate_secret(
        &self,
        ctx: &RequestContext,
        request: &RotateRequest,
    ) -> Result<AccessKeySecret> {
        let response = self
            .authorized_request(
                "rotate secret",
                &self.config.rotate_secret_endpoint,
                reqwest::Method::POST,
                request,
            )
            .await?;

        let secret = self
            .read_secret(
                "Rotate secret",
                response,
                &request.account_id,
                &request.user_name,
            )
            .await?;
        info!(new_access_key_id = %secret.access_key_id, "Rotated secret");
        Ok(secret)
    }

    #[instrument(skip(self, ctx), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn delete_access_key(
        &self,
        ctx: &RequestContext,
        account_id: &AccountId,
        user_name: &str,
        access_key_id: &AccessKeyId,
    ) -> Result<()> {
        let body = DeleteKeyRequest {
            access_key_id: access_key_id.as_str(),
            account_id: account_id.as_str(),
            user_name,
        };
        let response = self
            .authorized_request(
                "delete access key",
                &self.config.delete_key_endpoint,
                reqwest::Method::DELETE,
                &body,
            )
            .await?;

        match response.status() {
            StatusCode::OK => {
                info!("Deleted access key");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("Access key already absent from portal");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), "Portal rejected key deletion");
                Err(VaultSyncError::upstream(
                    status,
                    format!("Delete access key failed: {}", body),
                ))
            }
        }
    }
}
