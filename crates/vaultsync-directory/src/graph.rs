//! Graph-style directory provider
//!
//! All queries are bearer-authenticated GETs using OData `$filter` and
//! `$search`. Failures are logged and surface as absent or empty results.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use vaultsync_core::client::{read_json, HttpClient};
use vaultsync_core::{DirectoryProvider, DirectoryUser, ObjectId, RequestContext, Result};

use crate::common::*;
use crate::config::GraphDirectoryConfig;

/// Directory provider speaking the Microsoft Graph query dialect
pub struct GraphDirectory {
    config: GraphDirectoryConfig,
    http_client: HttpClient,
}

impl GraphDirectory {
    pub fn new(config: GraphDirectoryConfig, timeout: Duration) -> Result<Self> {
        Ok(Self::with_client(config, HttpClient::new(timeout)?))
    }

    pub fn with_client(config: GraphDirectoryConfig, http_client: HttpClient) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub fn config(&self) -> &GraphDirectoryConfig {
        &self.config
    }

    /// Send a query and parse a 200 response; anything else is logged and
    /// reported as `None`
    async fn fetch<T: DeserializeOwned>(
        &self,
        action: &str,
        request: RequestBuilder,
    ) -> Option<T> {
        let response = match self.http_client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(action, error = %e, "Directory request failed");
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!(action, status = status.as_u16(), "Directory rejected request");
            return None;
        }

        match read_json(response).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(action, error = %e, "Failed to parse directory response");
                None
            }
        }
    }

    fn users_base(&self) -> &str {
        self.config.users_endpoint.trim_end_matches('/')
    }

    fn uses_mail_filter(&self, email: &str) -> bool {
        match &self.config.special_mail_suffix {
            Some(suffix) if !suffix.is_empty() => {
                email.to_lowercase().ends_with(&suffix.to_lowercase())
            }
            _ => false,
        }
    }

    /// Direct object path, or a `startsWith(mail, …)` search for addresses
    /// the provider does not index by path
    fn user_request(&self, token: &str, email: &str) -> RequestBuilder {
        let client = self.http_client.inner();
        if self.uses_mail_filter(email) {
            client
                .get(self.users_base())
                .query(&[(
                    "$filter",
                    format!("startsWith(mail,{})", odata_literal(email)),
                )])
                .bearer_auth(token)
        } else {
            client
                .get(format!("{}/{}", self.users_base(), urlencoding::encode(email)))
                .bearer_auth(token)
        }
    }

    async fn fetch_user(&self, action: &str, token: &str, email: &str) -> Option<GraphUser> {
        let response: GraphUserResponse = self
            .fetch(action, self.user_request(token, email))
            .await?;
        response.into_user()
    }

    async fn search_groups(
        &self,
        action: &str,
        token: &str,
        query: &[(&str, String)],
    ) -> Vec<GraphGroup> {
        let request = self
            .http_client
            .inner()
            .get(&self.config.groups_endpoint)
            .header("Accept", "application/json")
            .query(query)
            .bearer_auth(token);

        self.fetch::<GraphListResponse<GraphGroup>>(action, request)
            .await
            .map(|page| page.value)
            .unwrap_or_default()
    }
}

#[async_trait]
impl DirectoryProvider for GraphDirectory {
    #[instrument(skip(self, ctx), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn service_token(&self, ctx: &RequestContext) -> Option<String> {
        if self.config.token_endpoint.is_empty() || self.config.client_id.is_empty() {
            warn!("Directory token endpoint or client id not configured");
            return None;
        }

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("resource", self.config.resource.as_str()),
        ];

        let request = self
            .http_client
            .inner()
            .post(&self.config.token_endpoint)
            .header("Accept", "application/json")
            .form(&params);

        let token: GraphTokenResponse = self.fetch("service_token", request).await?;
        token.access_token.filter(|t| !t.is_empty())
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn resolve_group_object_id(
        &self,
        ctx: &RequestContext,
        token: &str,
        group_name: &str,
    ) -> Option<ObjectId> {
        let filter = format!("displayName eq {}", odata_literal(group_name));
        let groups = self
            .search_groups("resolve_group_object_id", token, &[("$filter", filter)])
            .await;

        let object_id = select_group_object_id(&groups).and_then(ObjectId::non_empty);
        match &object_id {
            Some(id) => debug!(candidates = groups.len(), object_id = %id, "Resolved group object id"),
            None => info!("No directory group matches display name"),
        }
        object_id
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn search_groups_by_prefix(
        &self,
        ctx: &RequestContext,
        token: &str,
        prefix: &str,
    ) -> BTreeSet<String> {
        let filter = format!(
            "startsWith(displayName,{}) and securityEnabled eq true",
            odata_literal(prefix)
        );
        self.search_groups("search_groups_by_prefix", token, &[("$filter", filter)])
            .await
            .into_iter()
            .filter_map(|g| g.display_name)
            .collect()
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn search_group_emails_by_prefix(
        &self,
        ctx: &RequestContext,
        token: &str,
        prefix: &str,
    ) -> BTreeSet<String> {
        let query = [
            ("$filter", format!("startsWith(mail,{})", odata_literal(prefix))),
            ("$select", "id,mail".to_string()),
        ];
        self.search_groups("search_group_emails_by_prefix", token, &query)
            .await
            .into_iter()
            .filter_map(|g| g.mail)
            .filter(|m| !m.is_empty())
            .collect()
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn resolve_user_object_id(
        &self,
        ctx: &RequestContext,
        token: &str,
        email: &str,
    ) -> Option<ObjectId> {
        let user = self.fetch_user("resolve_user_object_id", token, email).await?;
        user.id.and_then(ObjectId::non_empty)
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn list_user_group_names(
        &self,
        ctx: &RequestContext,
        token: &str,
        user_id: &ObjectId,
    ) -> BTreeSet<String> {
        let url = format!(
            "{}/{}{}",
            self.users_base(),
            urlencoding::encode(user_id.as_str()),
            self.config.member_of_suffix
        );
        let request = self.http_client.inner().get(url).bearer_auth(token);

        let names: BTreeSet<String> = self
            .fetch::<GraphListResponse<GraphGroup>>("list_user_group_names", request)
            .await
            .map(|page| page.value)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|g| g.display_name)
            .collect();

        debug!(count = names.len(), "Retrieved user group memberships");
        names
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn resolve_user_by_email(
        &self,
        ctx: &RequestContext,
        token: &str,
        email: &str,
    ) -> Option<DirectoryUser> {
        let user = self.fetch_user("resolve_user_by_email", token, email).await?;
        Some(DirectoryUser {
            user_id: user.id,
            email: user.mail,
            ..Default::default()
        })
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    async fn lookup_extension_attribute(
        &self,
        ctx: &RequestContext,
        token: &str,
        email: &str,
    ) -> Option<DirectoryUser> {
        let query = [
            (
                "$select",
                "id,mail,otherMails,onPremisesExtensionAttributes".to_string(),
            ),
            (
                "$search",
                format!(
                    "{} OR {}",
                    search_clause("mail", email),
                    search_clause("otherMails", email)
                ),
            ),
        ];
        let request = self
            .http_client
            .inner()
            .get(self.users_base())
            .header("ConsistencyLevel", "eventual")
            .query(&query)
            .bearer_auth(token);

        let page: GraphListResponse<GraphUser> =
            self.fetch("lookup_extension_attribute", request).await?;
        let user = page.value.into_iter().next()?;

        Some(DirectoryUser {
            user_id: user.id,
            email: user.mail,
            extension_attribute: user
                .extension_attributes
                .and_then(|attrs| attrs.extension_attribute_15),
            ..Default::default()
        })
    }
}
