//! Entity Policy Resolver
//!
//! Computes the effective policies of a user's identity entity, creating
//! the entity alias on first use.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use vaultsync_backend::IdentityBackend;
use vaultsync_core::{
    DirectoryProvider, Entity, MountAccessor, RequestContext, Result, UserDirectory,
    VaultSyncError,
};

/// Resolver settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Mail domain whose users are aliased by their own email without a
    /// directory lookup, e.g. `@corp.onmicrosoft.com`
    pub special_email_domain: Option<String>,
}

/// The authenticated caller on whose behalf a resolution runs
#[derive(Clone)]
pub struct CallerIdentity {
    pub user_name: String,
    pub email: Option<String>,
    /// Caller's own client token, used for the inherited-policy lookup
    pub client_token: String,
}

impl std::fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerIdentity")
            .field("user_name", &self.user_name)
            .field("email", &self.email)
            .field("client_token", &"[REDACTED]")
            .finish()
    }
}

/// Entity with its effective, deduplicated policies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    /// Alias name the entity is bound by, in directory casing
    pub alias_name: String,
    pub entity: Entity,
}

pub struct EntityPolicyResolver {
    backend: IdentityBackend,
    directory: Arc<dyn DirectoryProvider>,
    primary: Arc<dyn UserDirectory>,
    secondary: Option<Arc<dyn UserDirectory>>,
    config: ResolverConfig,
}

impl EntityPolicyResolver {
    pub fn new(
        backend: IdentityBackend,
        directory: Arc<dyn DirectoryProvider>,
        primary: Arc<dyn UserDirectory>,
        secondary: Option<Arc<dyn UserDirectory>>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            backend,
            directory,
            primary,
            secondary,
            config,
        }
    }

    /// Resolve `username`'s entity and its effective policies.
    ///
    /// Fails with `PermissionDenied` when the alias mount is missing,
    /// `NotFound` when no directory knows the user, and the backend's
    /// status when the entity alias cannot be created.
    #[instrument(skip(self, ctx, token, caller), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        token: &str,
        username: &str,
        caller: Option<&CallerIdentity>,
        is_policy_update: bool,
    ) -> Result<ResolvedEntity> {
        let mount_accessor = self.mount_accessor(ctx, token).await?;

        let alias_name = self.alias_name(ctx, username, caller).await?;
        let alias_name = self.directory_casing(ctx, alias_name).await;

        let mut entity = self
            .lookup_or_create(ctx, token, &alias_name, &mount_accessor)
            .await?;

        let mut policies = std::mem::take(&mut entity.policies);
        if let Some(caller) = caller {
            if !is_policy_update && username.eq_ignore_ascii_case(&caller.user_name) {
                policies.extend(self.inherited_policies(ctx, &caller.client_token).await);
            }
        }
        entity.policies = dedup(policies);

        debug!(policies = ?entity.policies, "Resolved entity policies");
        Ok(ResolvedEntity { alias_name, entity })
    }

    /// Overwrite an entity's own policies
    #[instrument(skip(self, ctx, token, policies), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn update_entity_policies(
        &self,
        ctx: &RequestContext,
        token: &str,
        entity_name: &str,
        policies: &[String],
    ) -> Result<()> {
        self.backend
            .update_entity_by_name(ctx, token, entity_name, policies)
            .await?;
        info!("Updated entity policies");
        Ok(())
    }

    /// Renew the caller's token so updated policies apply. Failure is
    /// logged and otherwise ignored.
    #[instrument(skip(self, ctx, client_token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn renew_caller_token(&self, ctx: &RequestContext, client_token: &str) {
        if let Err(e) = self.backend.renew_token(ctx, client_token).await {
            warn!(error = %e, "Token renewal failed");
        }
    }

    async fn mount_accessor(&self, ctx: &RequestContext, token: &str) -> Result<MountAccessor> {
        let accessor = match self.backend.fetch_mount_accessor(ctx, token).await {
            Ok(accessor) => accessor,
            Err(e) => {
                warn!(error = %e, "Mount lookup failed");
                None
            }
        };
        accessor.ok_or_else(|| {
            VaultSyncError::permission_denied(
                "resolve entity",
                format!("{} auth mount", self.backend.config().alias_mount_type),
            )
        })
    }

    /// Caller's own special-domain email, else the primary then secondary
    /// directory's email for `username`
    async fn alias_name(
        &self,
        ctx: &RequestContext,
        username: &str,
        caller: Option<&CallerIdentity>,
    ) -> Result<String> {
        if let (Some(caller), Some(domain)) = (caller, self.special_domain()) {
            if let Some(email) = caller.email.as_deref() {
                if username == email && email.contains(domain) {
                    debug!("Special-domain caller, skipping directory lookup");
                    return Ok(email.to_string());
                }
            }
        }

        if let Some(email) = self.directory_email(ctx, &*self.primary, username).await {
            return Ok(email);
        }
        if let Some(secondary) = &self.secondary {
            if let Some(email) = self.directory_email(ctx, &**secondary, username).await {
                return Ok(email);
            }
        }

        Err(VaultSyncError::not_found("user", username))
    }

    async fn directory_email(
        &self,
        ctx: &RequestContext,
        directory: &dyn UserDirectory,
        username: &str,
    ) -> Option<String> {
        let user = directory.find_user(ctx, username).await;
        let email = user.as_ref().and_then(|u| u.email()).map(str::to_string);
        if email.is_none() {
            debug!(directory = directory.name(), "No email for user");
        }
        email
    }

    /// The directory provider's casing wins when it knows the address
    async fn directory_casing(&self, ctx: &RequestContext, alias_name: String) -> String {
        let Some(service_token) = self.directory.service_token(ctx).await else {
            return alias_name;
        };
        self.directory
            .resolve_user_by_email(ctx, &service_token, &alias_name)
            .await
            .and_then(|user| user.email().map(str::to_string))
            .unwrap_or(alias_name)
    }

    async fn lookup_or_create(
        &self,
        ctx: &RequestContext,
        token: &str,
        alias_name: &str,
        mount_accessor: &MountAccessor,
    ) -> Result<Entity> {
        if let Some(entity) = self
            .backend
            .lookup_entity(ctx, token, alias_name, mount_accessor)
            .await?
        {
            return Ok(entity);
        }

        info!(alias_name, "Creating entity alias");
        self.backend
            .create_entity_alias(ctx, token, alias_name, mount_accessor)
            .await?;

        self.backend
            .lookup_entity(ctx, token, alias_name, mount_accessor)
            .await?
            .ok_or_else(|| VaultSyncError::not_found("entity", alias_name))
    }

    /// Group-inherited policies on the caller's token; a failed lookup
    /// contributes nothing
    async fn inherited_policies(&self, ctx: &RequestContext, client_token: &str) -> Vec<String> {
        match self.backend.token_lookup(ctx, client_token).await {
            Ok(token) => token.identity_policies,
            Err(e) => {
                warn!(error = %e, "Token lookup failed, using entity policies only");
                Vec::new()
            }
        }
    }

    fn special_domain(&self) -> Option<&str> {
        self.config
            .special_email_domain
            .as_deref()
            .filter(|domain| !domain.is_empty())
    }
}

/// Order-preserving dedup
fn dedup(policies: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    policies
        .into_iter()
        .filter(|policy| seen.insert(policy.clone()))
        .collect()
}
