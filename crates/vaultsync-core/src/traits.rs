//! Collaborator traits for the three external stores

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::{context::RequestContext, error::Result, ids::*, models::*};

// =============================================================================
// Identity Backend
// =============================================================================

/// Path-based request contract of the identity backend.
///
/// Implementations never fail: a transport problem is reported as a
/// response carrying a gateway status so that callers only ever branch on
/// the status code.
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    async fn process(&self, path: &str, body: &serde_json::Value, token: &str)
        -> BackendResponse;
}

// =============================================================================
// Directory Provider
// =============================================================================

/// Read-only queries against the external directory provider.
///
/// Every operation degrades to an absent or empty result on failure and
/// logs the cause; nothing is retried here.
#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// Acquire a service session token for subsequent queries
    async fn service_token(&self, ctx: &RequestContext) -> Option<String>;

    /// Resolve a group display name to its object id by exact match
    async fn resolve_group_object_id(
        &self,
        ctx: &RequestContext,
        token: &str,
        group_name: &str,
    ) -> Option<ObjectId>;

    /// Display names of security groups starting with `prefix`
    async fn search_groups_by_prefix(
        &self,
        ctx: &RequestContext,
        token: &str,
        prefix: &str,
    ) -> BTreeSet<String>;

    /// Mail addresses of groups whose mail starts with `prefix`
    async fn search_group_emails_by_prefix(
        &self,
        ctx: &RequestContext,
        token: &str,
        prefix: &str,
    ) -> BTreeSet<String>;

    async fn resolve_user_object_id(
        &self,
        ctx: &RequestContext,
        token: &str,
        email: &str,
    ) -> Option<ObjectId>;

    /// Display names of every group the user is a member of
    async fn list_user_group_names(
        &self,
        ctx: &RequestContext,
        token: &str,
        user_id: &ObjectId,
    ) -> BTreeSet<String>;

    async fn resolve_user_by_email(
        &self,
        ctx: &RequestContext,
        token: &str,
        email: &str,
    ) -> Option<DirectoryUser>;

    /// Look a user up by primary or secondary mail and return its
    /// extension attribute
    async fn lookup_extension_attribute(
        &self,
        ctx: &RequestContext,
        token: &str,
        email: &str,
    ) -> Option<DirectoryUser>;
}

/// Username to email lookup used by the entity policy resolver
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn find_user(&self, ctx: &RequestContext, username: &str) -> Option<DirectoryUser>;

    /// Reverse lookup by the extension attribute the cloud directory
    /// mirrors from this one. Directories without that attribute find nothing.
    async fn find_by_extension_attribute(
        &self,
        _ctx: &RequestContext,
        _value: &str,
    ) -> Option<DirectoryUser> {
        None
    }
}

// =============================================================================
// Credential Portal
// =============================================================================

/// Authenticated access-key operations against the credential portal
#[async_trait]
pub trait CredentialPortal: Send + Sync {
    async fn create_access_key(
        &self,
        ctx: &RequestContext,
        account_id: &AccountId,
        user_name: &str,
    ) -> Result<AccessKeySecret>;

    async fn rotate_secret(
        &self,
        ctx: &RequestContext,
        request: &RotateRequest,
    ) -> Result<AccessKeySecret>;

    /// Delete a key; an already-deleted key counts as success
    async fn delete_access_key(
        &self,
        ctx: &RequestContext,
        account_id: &AccountId,
        user_name: &str,
        access_key_id: &AccessKeyId,
    ) -> Result<()>;
}
