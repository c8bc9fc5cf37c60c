//! Single-request operations against the identity backend
//!
//! Every method issues exactly one request and maps the status onto a
//! typed result. Callers branch on the returned error's status, never on
//! an absent body alone.

use http::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use vaultsync_core::{
    AccessKeyId, AccessKeySecret, AliasId, BackendResponse, CanonicalId, Entity, Group,
    GroupAlias, LedgerKey, MountAccessor, ObjectId, RequestContext, RequestProcessor, Result,
    TokenPolicies,
};

use crate::config::BackendConfig;
use crate::paths;
use crate::wire::*;

/// Typed client over a [`RequestProcessor`]
#[derive(Clone)]
pub struct IdentityBackend {
    processor: Arc<dyn RequestProcessor>,
    config: BackendConfig,
}

impl IdentityBackend {
    pub fn new(processor: Arc<dyn RequestProcessor>, config: BackendConfig) -> Self {
        Self { processor, config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn send<B: Serialize>(&self, path: &str, body: &B, token: &str) -> Result<BackendResponse> {
        let body = serde_json::to_value(body)?;
        let response = self.processor.process(path, &body, token).await;
        debug!(path, status = response.status.as_u16(), "Backend request finished");
        Ok(response)
    }

    /// Send and require one exact status
    async fn send_expecting<B: Serialize>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
        token: &str,
        expected: StatusCode,
    ) -> Result<BackendResponse> {
        let response = self.send(path, body, token).await?;
        if response.status == expected {
            Ok(response)
        } else {
            warn!(operation, status = response.status.as_u16(), "Backend rejected request");
            Err(response.into_error(operation))
        }
    }

    // =========================================================================
    // Groups
    // =========================================================================

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn read_group_by_name(
        &self,
        ctx: &RequestContext,
        token: &str,
        name: &str,
    ) -> Result<Group> {
        let response = self
            .send_expecting(
                "Read group",
                paths::GROUP_READ,
                &GroupReadRequest { group: name },
                token,
                StatusCode::OK,
            )
            .await?;
        let body: GroupReadResponse = response.json()?;

        let canonical_id = CanonicalId::non_empty(body.id.clone());
        let alias = body.alias.and_then(|alias| {
            let mut bound = GroupAlias::bind(
                alias.canonical_id.map(CanonicalId::from).or_else(|| canonical_id.clone()),
                alias.mount_accessor.map(MountAccessor::from),
                alias.name.map(ObjectId::from),
            )?;
            bound.id = alias.id.and_then(AliasId::non_empty);
            Some(bound)
        });

        Ok(Group {
            name: body.name.unwrap_or_else(|| name.to_string()),
            canonical_id: CanonicalId::new(body.id),
            policies: body.policies,
            alias,
        })
    }

    /// Requires `204 No Content`
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn delete_group_by_name(
        &self,
        ctx: &RequestContext,
        token: &str,
        name: &str,
    ) -> Result<()> {
        self.send_expecting(
            "Delete group",
            paths::GROUP_DELETE,
            &NameRequest { name },
            token,
            StatusCode::NO_CONTENT,
        )
        .await?;
        info!("Deleted group");
        Ok(())
    }

    /// Create or update a group. Returns the canonical id when the backend
    /// created the group (200 with body) and `None` when it updated one in
    /// place (204).
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn update_group_by_name(
        &self,
        ctx: &RequestContext,
        token: &str,
        name: &str,
        policies: &[String],
    ) -> Result<Option<CanonicalId>> {
        let request = GroupUpdateRequest {
            name,
            group_type: &self.config.group_type,
            policies,
        };
        let response = self.send(paths::GROUP_UPDATE, &request, token).await?;

        match response.status {
            StatusCode::OK => {
                let created: CreatedResponse = response.json()?;
                Ok(created
                    .data
                    .and_then(|d| d.id)
                    .and_then(CanonicalId::non_empty))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => {
                warn!(status = status.as_u16(), "Group update rejected");
                Err(response.into_error("Update group"))
            }
        }
    }

    // =========================================================================
    // Aliases
    // =========================================================================

    /// Requires `204 No Content`
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn delete_alias_by_id(
        &self,
        ctx: &RequestContext,
        token: &str,
        alias_id: &AliasId,
    ) -> Result<()> {
        self.send_expecting(
            "Delete group alias",
            paths::GROUP_ALIAS_DELETE,
            &IdRequest {
                id: alias_id.as_str(),
            },
            token,
            StatusCode::NO_CONTENT,
        )
        .await?;
        Ok(())
    }

    /// Returns the new alias id when the backend reports one
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn create_group_alias(
        &self,
        ctx: &RequestContext,
        token: &str,
        alias: &GroupAlias,
    ) -> Result<Option<AliasId>> {
        let request = GroupAliasRequest {
            canonical_id: alias.canonical_id.as_str(),
            mount_accessor: alias.mount_accessor.as_str(),
            name: alias.external_object_id.as_str(),
        };
        let response = self.send(paths::GROUP_ALIAS_CREATE, &request, token).await?;

        match response.status {
            StatusCode::OK => {
                let created: CreatedResponse = response.json()?;
                Ok(created.data.and_then(|d| d.id).and_then(AliasId::non_empty))
            }
            StatusCode::NO_CONTENT => Ok(None),
            status => {
                warn!(status = status.as_u16(), "Group alias creation rejected");
                Err(response.into_error("Create group alias"))
            }
        }
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Any status other than 200 means no entity is bound to the alias
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn lookup_entity(
        &self,
        ctx: &RequestContext,
        token: &str,
        alias_name: &str,
        mount_accessor: &MountAccessor,
    ) -> Result<Option<Entity>> {
        let request = EntityLookupRequest {
            alias_name,
            alias_mount_accessor: mount_accessor.as_str(),
        };
        let response = self.send(paths::ENTITY_LOOKUP, &request, token).await?;
        if response.status != StatusCode::OK {
            debug!(status = response.status.as_u16(), "No entity bound to alias");
            return Ok(None);
        }

        let body: EntityLookupResponse = response.json()?;
        Ok(Some(Entity {
            name: body.data.name.unwrap_or_default(),
            canonical_id: body.data.id.and_then(CanonicalId::non_empty),
            policies: body.data.policies,
            mount_accessor: Some(mount_accessor.clone()),
        }))
    }

    /// Requires `200 OK`
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn create_entity_alias(
        &self,
        ctx: &RequestContext,
        token: &str,
        alias_name: &str,
        mount_accessor: &MountAccessor,
    ) -> Result<()> {
        self.send_expecting(
            "Create entity alias",
            paths::ENTITY_ALIAS_CREATE,
            &EntityAliasRequest {
                name: alias_name,
                mount_accessor: mount_accessor.as_str(),
            },
            token,
            StatusCode::OK,
        )
        .await?;
        info!("Created entity alias");
        Ok(())
    }

    /// Overwrite an entity's policies; the entity is left enabled with no metadata
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn update_entity_by_name(
        &self,
        ctx: &RequestContext,
        token: &str,
        name: &str,
        policies: &[String],
    ) -> Result<()> {
        let request = EntityUpdateRequest {
            name,
            policies,
            disabled: false,
            metadata: BTreeMap::new(),
        };
        let response = self.send(paths::ENTITY_UPDATE, &request, token).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_error("Update entity"))
        }
    }

    // =========================================================================
    // Tokens and mounts
    // =========================================================================

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn token_lookup(&self, ctx: &RequestContext, token: &str) -> Result<TokenPolicies> {
        let response = self
            .send_expecting(
                "Token lookup",
                &self.config.token_lookup_path,
                &serde_json::json!({}),
                token,
                StatusCode::OK,
            )
            .await?;
        let body: TokenLookupResponse = response.json()?;
        Ok(TokenPolicies {
            policies: body.policies,
            identity_policies: body.identity_policies,
        })
    }

    /// Renew the caller's token so new policies take effect
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn renew_token(&self, ctx: &RequestContext, token: &str) -> Result<()> {
        self.send_expecting(
            "Token renew",
            &self.config.token_renew_path,
            &serde_json::json!({}),
            token,
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }

    /// Accessor of the alias-producing auth mount; `None` when the mount
    /// is not enabled
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn fetch_mount_accessor(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> Result<Option<MountAccessor>> {
        let response = self
            .send_expecting(
                "List auth mounts",
                paths::MOUNT_LIST,
                &serde_json::json!({}),
                token,
                StatusCode::OK,
            )
            .await?;
        let body: MountListResponse = response.json()?;

        let key = format!("{}/", self.config.alias_mount_type);
        Ok(body
            .data
            .get(&key)
            .and_then(|mount| mount.accessor.clone())
            .and_then(MountAccessor::non_empty))
    }

    // =========================================================================
    // Generic paths
    // =========================================================================

    /// Read the `data` of a path; any status other than 200 is an error
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn read_path<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        token: &str,
        path: &str,
    ) -> Result<T> {
        let response = self
            .send_expecting("Read path", paths::READ, &ReadRequest { path }, token, StatusCode::OK)
            .await?;
        let body: ReadResponse<T> = response.json()?;
        Ok(body.data)
    }

    #[instrument(skip(self, ctx, token, data), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn write_path<T: Serialize + Sync>(
        &self,
        ctx: &RequestContext,
        token: &str,
        path: &str,
        data: &T,
    ) -> Result<()> {
        let response = self
            .send(paths::WRITE, &WriteRequest { path, data }, token)
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            warn!(status = response.status.as_u16(), "Write rejected");
            Err(response.into_error("Write path"))
        }
    }

    /// Store a freshly issued secret under its service account
    #[instrument(skip(self, ctx, token, secret), fields(user = %ctx.user, request_id = %ctx.request_id, access_key_id = %secret.access_key_id))]
    pub async fn write_secret(
        &self,
        ctx: &RequestContext,
        token: &str,
        secret: &AccessKeySecret,
    ) -> Result<()> {
        let key = LedgerKey::new(secret.account_id.clone(), secret.user_name.clone());
        let path = self.secret_path(&key, &secret.access_key_id);
        self.write_path(ctx, token, &path, secret).await
    }

    /// `metadata/<prefix>/<account>_<user>`
    pub fn metadata_path(&self, key: &LedgerKey) -> String {
        format!(
            "metadata/{}/{}",
            self.config.secret_path_prefix.trim_matches('/'),
            key.unique_name()
        )
    }

    /// `<prefix>/<account>_<user>/<accessKeyId>`
    pub fn secret_path(&self, key: &LedgerKey, access_key_id: &AccessKeyId) -> String {
        format!(
            "{}/{}/{}",
            self.config.secret_path_prefix.trim_matches('/'),
            key.unique_name(),
            access_key_id
        )
    }
}

impl std::fmt::Debug for IdentityBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

