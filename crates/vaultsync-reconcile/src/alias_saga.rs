//! Alias Reconciliation Saga
//!
//! The identity backend can replace a group and its directory alias but
//! cannot update either in place. Applying a new policy set to an aliased
//! group therefore runs as a fixed sequence of named steps:
//!
//! 1. delete the alias
//! 2. delete the group
//! 3. recreate the group with the new policies
//! 4. resolve the alias-producing mount accessor
//! 5. resolve the group's directory object id
//! 6. create the new alias
//!
//! Once the group has been deleted, any step that fails to yield the three
//! binding values triggers the single compensation: the group is written
//! back with its original policies. The deleted alias is not restored.

use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use vaultsync_backend::IdentityBackend;
use vaultsync_core::{
    AliasId, CanonicalId, DirectoryProvider, GroupAlias, MountAccessor, ObjectId, RequestContext,
    VaultSyncError,
};

// =============================================================================
// Outcome types
// =============================================================================

/// Named step of the saga
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStep {
    /// Read the group to learn its alias id and current policies
    ReadGroup,
    DeleteAlias,
    DeleteGroup,
    RecreateGroup,
    ResolveMountAccessor,
    ResolveObjectId,
    CreateAlias,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ReadGroup => "read_group",
            SagaStep::DeleteAlias => "delete_alias",
            SagaStep::DeleteGroup => "delete_group",
            SagaStep::RecreateGroup => "recreate_group",
            SagaStep::ResolveMountAccessor => "resolve_mount_accessor",
            SagaStep::ResolveObjectId => "resolve_object_id",
            SagaStep::CreateAlias => "create_alias",
        }
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the saga did to undo a partial run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compensation {
    /// Failed before anything was mutated, or at a step with no rollback
    NotRequired,
    /// The group was written back with its original policies
    PoliciesRestored,
    /// The rollback write itself was rejected
    RestoreFailed,
}

/// Terminal failure of a saga run
#[derive(Debug, Clone, thiserror::Error)]
#[error("alias saga failed at {step}: {message}")]
pub struct SagaFailure {
    pub step: SagaStep,
    /// Status reported by the backend, when the failing step received one
    pub upstream_status: Option<StatusCode>,
    pub compensation: Compensation,
    pub message: String,
}

impl SagaFailure {
    fn new(step: SagaStep, upstream_status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            step,
            upstream_status,
            compensation: Compensation::NotRequired,
            message: message.into(),
        }
    }

    fn from_error(step: SagaStep, err: &VaultSyncError) -> Self {
        Self::new(step, err.upstream_status(), err.to_string())
    }

    /// Upstream status, or 400 when the failing step had none
    pub fn status(&self) -> StatusCode {
        self.upstream_status.unwrap_or(StatusCode::BAD_REQUEST)
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasBinding {
    pub group_name: String,
    pub policies: Vec<String>,
    pub alias: GroupAlias,
}

// =============================================================================
// Saga
// =============================================================================

/// Replaces a group's policies and re-binds its directory alias
pub struct AliasSaga {
    backend: IdentityBackend,
    directory: Arc<dyn DirectoryProvider>,
}

impl AliasSaga {
    pub fn new(backend: IdentityBackend, directory: Arc<dyn DirectoryProvider>) -> Self {
        Self { backend, directory }
    }

    /// Read the group first, then run the saga against its current alias
    /// and policies
    #[instrument(skip(self, ctx, token, new_policies), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn run_for_group(
        &self,
        ctx: &RequestContext,
        token: &str,
        group_name: &str,
        new_policies: &[String],
    ) -> std::result::Result<AliasBinding, SagaFailure> {
        let group = self
            .backend
            .read_group_by_name(ctx, token, group_name)
            .await
            .map_err(|e| SagaFailure::from_error(SagaStep::ReadGroup, &e))?;

        let Some(alias_id) = group.alias.as_ref().and_then(|alias| alias.id.clone()) else {
            warn!("Group has no alias to replace");
            return Err(SagaFailure::new(
                SagaStep::ReadGroup,
                None,
                format!("group {} has no directory alias", group_name),
            ));
        };

        self.run(ctx, token, group_name, &alias_id, &group.policies, new_policies)
            .await
    }

    /// Run the saga for a group whose alias id and current policies are known
    #[instrument(skip(self, ctx, token, original_policies, new_policies), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn run(
        &self,
        ctx: &RequestContext,
        token: &str,
        group_name: &str,
        alias_id: &AliasId,
        original_policies: &[String],
        new_policies: &[String],
    ) -> std::result::Result<AliasBinding, SagaFailure> {
        info!(policies = ?new_policies, "Replacing group alias");

        // Nothing has changed yet, so a failure here needs no rollback
        if let Err(e) = self.backend.delete_alias_by_id(ctx, token, alias_id).await {
            warn!(error = %e, "Alias delete failed, group left untouched");
            return Err(SagaFailure::from_error(SagaStep::DeleteAlias, &e));
        }

        if let Err(e) = self.backend.delete_group_by_name(ctx, token, group_name).await {
            let failure = SagaFailure::from_error(SagaStep::DeleteGroup, &e);
            return Err(self.compensate(ctx, token, group_name, original_policies, failure).await);
        }

        let binding = match self.rebind(ctx, token, group_name, new_policies).await {
            Ok(binding) => binding,
            Err(failure) => {
                return Err(self.compensate(ctx, token, group_name, original_policies, failure).await)
            }
        };

        // No rollback once the binding values are known; the group already
        // carries the new policies
        let alias_id = self
            .backend
            .create_group_alias(ctx, token, &binding)
            .await
            .map_err(|e| {
                error!(error = %e, "Alias create failed after group was recreated");
                SagaFailure::from_error(SagaStep::CreateAlias, &e)
            })?;

        let mut alias = binding;
        alias.id = alias_id;
        info!(object_id = %alias.external_object_id, "Group alias replaced");

        Ok(AliasBinding {
            group_name: group_name.to_string(),
            policies: new_policies.to_vec(),
            alias,
        })
    }

    /// Steps 3 to 5: recreate the group and gather the three binding values
    async fn rebind(
        &self,
        ctx: &RequestContext,
        token: &str,
        group_name: &str,
        new_policies: &[String],
    ) -> std::result::Result<GroupAlias, SagaFailure> {
        let canonical_id = self
            .recreate_group(ctx, token, group_name, new_policies)
            .await?;
        let mount_accessor = self.mount_accessor(ctx, token).await?;
        let object_id = self.object_id(ctx, group_name).await?;

        GroupAlias::bind(Some(canonical_id), Some(mount_accessor), Some(object_id)).ok_or_else(
            || SagaFailure::new(SagaStep::CreateAlias, None, "alias binding values incomplete"),
        )
    }

    async fn recreate_group(
        &self,
        ctx: &RequestContext,
        token: &str,
        group_name: &str,
        new_policies: &[String],
    ) -> std::result::Result<CanonicalId, SagaFailure> {
        let created = self
            .backend
            .update_group_by_name(ctx, token, group_name, new_policies)
            .await
            .map_err(|e| SagaFailure::from_error(SagaStep::RecreateGroup, &e))?;

        if let Some(canonical_id) = created {
            return Ok(canonical_id);
        }

        // Updated in place: the backend reports no id, so read it back
        debug!("Group updated in place, reading canonical id");
        self.backend
            .read_group_by_name(ctx, token, group_name)
            .await
            .ok()
            .and_then(|group| CanonicalId::non_empty(group.canonical_id.into_string()))
            .ok_or_else(|| {
                SagaFailure::new(SagaStep::RecreateGroup, None, "recreated group has no canonical id")
            })
    }

    async fn mount_accessor(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> std::result::Result<MountAccessor, SagaFailure> {
        match self.backend.fetch_mount_accessor(ctx, token).await {
            Ok(Some(accessor)) => Ok(accessor),
            Ok(None) => Err(SagaFailure::new(
                SagaStep::ResolveMountAccessor,
                None,
                format!("{} mount is not enabled", self.backend.config().alias_mount_type),
            )),
            Err(e) => Err(SagaFailure::from_error(SagaStep::ResolveMountAccessor, &e)),
        }
    }

    async fn object_id(
        &self,
        ctx: &RequestContext,
        group_name: &str,
    ) -> std::result::Result<ObjectId, SagaFailure> {
        let Some(service_token) = self.directory.service_token(ctx).await else {
            return Err(SagaFailure::new(
                SagaStep::ResolveObjectId,
                None,
                "directory service token unavailable",
            ));
        };

        self.directory
            .resolve_group_object_id(ctx, &service_token, group_name)
            .await
            .ok_or_else(|| {
                SagaFailure::new(
                    SagaStep::ResolveObjectId,
                    None,
                    format!("no directory group named {}", group_name),
                )
            })
    }

    /// Write the original policies back. The alias stays deleted.
    async fn compensate(
        &self,
        ctx: &RequestContext,
        token: &str,
        group_name: &str,
        original_policies: &[String],
        mut failure: SagaFailure,
    ) -> SagaFailure {
        warn!(step = %failure.step, "Saga failed, restoring original policies");

        failure.compensation = match self
            .backend
            .update_group_by_name(ctx, token, group_name, original_policies)
            .await
        {
            Ok(_) => Compensation::PoliciesRestored,
            Err(e) => {
                error!(error = %e, "Failed to restore original group policies");
                Compensation::RestoreFailed
            }
        };
        failure
    }
}
