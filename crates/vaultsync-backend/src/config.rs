//! Identity backend adapter configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Type of the auth mount whose accessor scopes every alias
    pub alias_mount_type: String,
    /// Group type used when recreating a group
    pub group_type: String,
    /// Root of service-account secrets; ledger documents live under
    /// `metadata/<prefix>/`
    pub secret_path_prefix: String,
    pub token_lookup_path: String,
    pub token_renew_path: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            alias_mount_type: "oidc".to_string(),
            group_type: "external".to_string(),
            secret_path_prefix: "iamsvcacc".to_string(),
            token_lookup_path: "/auth/tvault/lookup".to_string(),
            token_renew_path: "/auth/tvault/renew".to_string(),
        }
    }
}
