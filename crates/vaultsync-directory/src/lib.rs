//! vaultsync directory - read-only queries against the external directory
//! provider
//!
//! This crate provides:
//! - `GraphDirectory`: group and user lookups over a Graph-style API
//! - `SelfServiceFilter`: reduction of memberships to self-service targets
//! - `LdapUserDirectory`: username to email lookups (feature `ldap`)
//!
//! Nothing here raises past its boundary. A failed or rejected query is
//! logged and answered with an absent or empty result.

mod common;
pub mod config;
pub mod graph;
pub mod self_service;

#[cfg(feature = "ldap")]
pub mod ldap;


pub use config::*;
pub use graph::GraphDirectory;
pub use self_service::SelfServiceFilter;

#[cfg(feature = "ldap")]
pub use ldap::LdapUserDirectory;

use tracing::{debug, instrument};
use vaultsync_core::{DirectoryProvider, RequestContext, UserDirectory};

/// Recover an on-premises username from a cloud mail address through the
/// extension attribute the cloud directory mirrors
#[instrument(skip(directory, users, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
pub async fn recover_user_name(
    directory: &dyn DirectoryProvider,
    users: &dyn UserDirectory,
    ctx: &RequestContext,
    token: &str,
    email: &str,
) -> Option<String> {
    let cloud_user = directory.lookup_extension_attribute(ctx, token, email).await?;
    let attribute = cloud_user
        .extension_attribute
        .filter(|value| !value.trim().is_empty())?;

    let user_name = users
        .find_by_extension_attribute(ctx, &attribute)
        .await
        .and_then(|user| user.user_name)
        .filter(|name| !name.is_empty());

    debug!(
        directory = users.name(),
        found = user_name.is_some(),
        "Username recovery finished"
    );
    user_name
}
