//! Directory adapter configuration

use serde::{Deserialize, Serialize};

/// Graph-style directory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphDirectoryConfig {
    /// Client-credentials token endpoint
    pub token_endpoint: String,
    /// Application (client) ID
    pub client_id: String,
    /// Client secret
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Resource the service token is issued for
    pub resource: String,
    /// Collection endpoint for group searches
    pub groups_endpoint: String,
    /// Collection endpoint for user lookups; user ids and emails are appended
    pub users_endpoint: String,
    /// Path appended to a user object to list its memberships
    pub member_of_suffix: String,
    /// Addresses ending in this suffix are looked up with a `startsWith(mail, …)`
    /// filter because the provider does not index them by object path
    pub special_mail_suffix: Option<String>,
}

impl Default for GraphDirectoryConfig {
    fn default() -> Self {
        Self {
            token_endpoint: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            resource: "https://graph.microsoft.com".to_string(),
            groups_endpoint: "https://graph.microsoft.com/v1.0/groups".to_string(),
            users_endpoint: "https://graph.microsoft.com/v1.0/users".to_string(),
            member_of_suffix: "/memberOf".to_string(),
            special_mail_suffix: None,
        }
    }
}

/// Naming convention for self-service admin groups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfServiceConfig {
    /// A user is a self-service admin when any trimmed group name fully
    /// matches this pattern
    pub admin_group_pattern: String,
    pub prefix: String,
    pub suffix: String,
}

impl Default for SelfServiceConfig {
    fn default() -> Self {
        Self {
            admin_group_pattern: "r_selfservice_.+_admin".to_string(),
            prefix: "r_selfservice_".to_string(),
            suffix: "_admin".to_string(),
        }
    }
}

/// On-premises LDAP directory used for username to email lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapDirectoryConfig {
    /// Name used in logs
    pub name: String,
    /// LDAP server URL (e.g., "ldaps://ldap.company.com:636")
    pub server_url: String,
    pub bind_dn: String,
    #[serde(skip_serializing)]
    pub bind_password: String,
    pub start_tls: bool,
    pub base_dn: String,
    /// `{value}` is replaced with the escaped username
    pub user_filter: String,
    /// `{value}` is replaced with the escaped extension attribute
    pub extension_attribute_filter: String,
    pub user_name_attribute: String,
    pub mail_attribute: String,
    pub display_name_attribute: String,
}

impl Default for LdapDirectoryConfig {
    fn default() -> Self {
        Self {
            name: "ldap".to_string(),
            server_url: String::new(),
            bind_dn: String::new(),
            bind_password: String::new(),
            start_tls: false,
            base_dn: String::new(),
            user_filter: "(&(objectClass=user)(sAMAccountName={value}))".to_string(),
            extension_attribute_filter: "(&(objectClass=user)(extensionAttribute15={value}))"
                .to_string(),
            user_name_attribute: "sAMAccountName".to_string(),
            mail_attribute: "mail".to_string(),
            display_name_attribute: "displayName".to_string(),
        }
    }
}
