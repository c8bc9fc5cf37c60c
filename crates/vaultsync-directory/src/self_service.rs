//! Self-service admin group filtering

use regex::Regex;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

use vaultsync_core::{DirectoryProvider, ObjectId, RequestContext, Result, VaultSyncError};

use crate::config::SelfServiceConfig;

/// Maps a user's group memberships to the groups they administer through
/// self-service admin groups (`<prefix><group><suffix>`)
#[derive(Debug, Clone)]
pub struct SelfServiceFilter {
    full_match: Regex,
    partial_match: Regex,
    prefix: String,
    suffix: String,
}

impl SelfServiceFilter {
    pub fn new(config: &SelfServiceConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                VaultSyncError::config_error(format!("Invalid self-service group pattern: {}", e))
            })
        };

        Ok(Self {
            full_match: compile(&format!("^(?:{})$", config.admin_group_pattern))?,
            partial_match: compile(&config.admin_group_pattern)?,
            prefix: config.prefix.clone(),
            suffix: config.suffix.clone(),
        })
    }

    /// True when any trimmed group name fully matches the admin pattern
    pub fn is_admin(&self, group_names: &BTreeSet<String>) -> bool {
        group_names
            .iter()
            .any(|name| self.full_match.is_match(name.trim()))
    }

    /// Target group names administered by this user; empty when the user
    /// is not a self-service admin
    pub fn target_groups(&self, group_names: &BTreeSet<String>) -> Vec<String> {
        if !self.is_admin(group_names) {
            return Vec::new();
        }

        let targets: BTreeSet<String> = group_names
            .iter()
            .filter(|name| self.partial_match.is_match(name))
            .filter_map(|name| self.strip(name))
            .collect();
        targets.into_iter().collect()
    }

    /// Text between the first `prefix` and the following `suffix`
    fn strip(&self, name: &str) -> Option<String> {
        let start = name.find(&self.prefix)? + self.prefix.len();
        let len = name[start..].find(&self.suffix)?;
        Some(name[start..start + len].to_string())
    }

    /// List the user's memberships and reduce them to self-service targets
    #[instrument(skip(self, directory, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn groups_for_user(
        &self,
        directory: &dyn DirectoryProvider,
        ctx: &RequestContext,
        token: &str,
        user_id: &ObjectId,
    ) -> Vec<String> {
        let memberships = directory.list_user_group_names(ctx, token, user_id).await;
        let targets = self.target_groups(&memberships);
        if targets.is_empty() {
            debug!("No self-service groups available");
        } else {
            debug!(count = targets.len(), "Retrieved self-service groups");
        }
        targets
    }
}
