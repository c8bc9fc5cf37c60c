//! Credential portal configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Base URL the key endpoints are appended to
    pub domain: String,
    /// Full URL of the app-role login that issues portal tokens
    pub auth_endpoint: String,
    pub create_key_endpoint: String,
    pub rotate_secret_endpoint: String,
    pub delete_key_endpoint: String,
    pub role_id: String,
    #[serde(skip_serializing)]
    pub secret_id: String,
    /// Scheme placed before the encoded token in the `Authorization` header
    pub auth_header_prefix: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            auth_endpoint: String::new(),
            create_key_endpoint: String::new(),
            rotate_secret_endpoint: String::new(),
            delete_key_endpoint: String::new(),
            role_id: String::new(),
            secret_id: String::new(),
            auth_header_prefix: "Bearer".to_string(),
        }
    }
}

impl PortalConfig {
    /// Full URL of a key endpoint, or `None` when either part is unset
    pub fn endpoint(&self, path: &str) -> Option<String> {
        if self.domain.is_empty() || path.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.domain.trim_end_matches('/'), path))
    }
}
