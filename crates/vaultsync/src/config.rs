//! Service configuration

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use vaultsync_backend::BackendConfig;
use vaultsync_directory::{GraphDirectoryConfig, LdapDirectoryConfig, SelfServiceConfig};
use vaultsync_portal::PortalConfig;
use vaultsync_reconcile::{LedgerConfig, ResolverConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http: HttpSettings,
    pub directory: GraphDirectoryConfig,
    pub self_service: SelfServiceConfig,
    pub backend: BackendConfig,
    pub resolver: ResolverConfig,
    pub portal: PortalConfig,
    pub ledger: LedgerConfig,
    pub ldap: LdapSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    /// Per-request budget for directory and portal calls
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Username directories consulted by the entity resolver, in order
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LdapSettings {
    pub primary: Option<LdapDirectoryConfig>,
    pub secondary: Option<LdapDirectoryConfig>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Settings {
    /// Load `.env`, then `config/default`, `config/local` and
    /// `VAULTSYNC__*` variables, later sources winning
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("VAULTSYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Parse settings from TOML text alone
    pub fn from_toml(text: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
