//! LDAP / Active Directory user lookups
//!
//! Requires the `ldap` feature to be enabled.

use async_trait::async_trait;
use ldap3::{ldap_escape, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, instrument, warn};

use vaultsync_core::{DirectoryUser, RequestContext, Result, UserDirectory, VaultSyncError};

use crate::config::LdapDirectoryConfig;

/// Username to email lookups against an on-premises directory
pub struct LdapUserDirectory {
    config: LdapDirectoryConfig,
}

impl LdapUserDirectory {
    pub fn new(config: LdapDirectoryConfig) -> Result<Self> {
        if config.server_url.is_empty() || config.base_dn.is_empty() {
            return Err(VaultSyncError::config_error(format!(
                "LDAP directory '{}' needs server_url and base_dn",
                config.name
            )));
        }
        Ok(Self { config })
    }

    async fn connect(&self) -> Result<ldap3::Ldap> {
        let settings = LdapConnSettings::new().set_starttls(self.config.start_tls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.server_url)
            .await
            .map_err(|e| VaultSyncError::transport_error(format!("LDAP connection failed: {}", e)))?;

        ldap3::drive!(conn);

        ldap.simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await
            .and_then(|r| r.success())
            .map_err(|e| VaultSyncError::config_error(format!("LDAP bind failed: {}", e)))?;

        Ok(ldap)
    }

    async fn search_one(&self, filter_template: &str, value: &str) -> Result<Option<DirectoryUser>> {
        let filter = filter_template.replace("{value}", &ldap_escape(value));
        let attrs = vec![
            self.config.user_name_attribute.as_str(),
            self.config.mail_attribute.as_str(),
            self.config.display_name_attribute.as_str(),
        ];

        let mut ldap = self.connect().await?;
        let (entries, _result) = ldap
            .search(&self.config.base_dn, Scope::Subtree, &filter, attrs)
            .await
            .and_then(|r| r.success())
            .map_err(|e| VaultSyncError::transport_error(format!("LDAP search failed: {}", e)))?;
        ldap.unbind().await.ok();

        Ok(entries
            .into_iter()
            .next()
            .map(|entry| self.entry_to_user(&SearchEntry::construct(entry))))
    }

    fn entry_to_user(&self, entry: &SearchEntry) -> DirectoryUser {
        let attr = |name: &str| entry.attrs.get(name).and_then(|v| v.first()).cloned();
        DirectoryUser {
            user_id: Some(entry.dn.clone()),
            user_name: attr(&self.config.user_name_attribute),
            email: attr(&self.config.mail_attribute),
            display_name: attr(&self.config.display_name_attribute),
            extension_attribute: None,
        }
    }
}

#[async_trait]
impl UserDirectory for LdapUserDirectory {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self, ctx), fields(directory = %self.config.name, request_id = %ctx.request_id))]
    async fn find_user(&self, ctx: &RequestContext, username: &str) -> Option<DirectoryUser> {
        match self.search_one(&self.config.user_filter, username).await {
            Ok(user) => {
                debug!(found = user.is_some(), "LDAP user lookup finished");
                user
            }
            Err(e) => {
                warn!(error = %e, "LDAP user lookup failed");
                None
            }
        }
    }

    #[instrument(skip(self, ctx), fields(directory = %self.config.name, request_id = %ctx.request_id))]
    async fn find_by_extension_attribute(
        &self,
        ctx: &RequestContext,
        value: &str,
    ) -> Option<DirectoryUser> {
        match self
            .search_one(&self.config.extension_attribute_filter, value)
            .await
        {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "LDAP extension attribute lookup failed");
                None
            }
        }
    }
}
