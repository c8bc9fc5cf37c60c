//! vaultsync - identity-alias and credential-lifecycle reconciliation
//!
//! Loads [`Settings`], installs tracing and wires the adapters into the
//! saga, resolver, ledger and credential lifecycle. The identity backend is
//! reached through a caller-supplied [`RequestProcessor`].

pub mod config;
pub mod telemetry;


pub use config::Settings;
pub use telemetry::init_tracing;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, instrument};

use vaultsync_backend::IdentityBackend;
use vaultsync_core::{
    CredentialPortal, DirectoryProvider, RequestContext, RequestProcessor, UserDirectory,
};
use vaultsync_directory::{GraphDirectory, SelfServiceFilter};
use vaultsync_portal::PortalClient;
use vaultsync_reconcile::{AccessKeyLedger, AliasSaga, CredentialLifecycle, EntityPolicyResolver};

/// Username directories for the entity resolver
#[derive(Clone)]
pub struct UserDirectories {
    pub primary: Arc<dyn UserDirectory>,
    pub secondary: Option<Arc<dyn UserDirectory>>,
}

impl UserDirectories {
    /// LDAP directories from `ldap.primary` and `ldap.secondary`
    #[cfg(feature = "ldap")]
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        use vaultsync_directory::LdapUserDirectory;

        let primary = settings
            .ldap
            .primary
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ldap.primary is not configured"))?;
        let secondary = match settings.ldap.secondary.clone() {
            Some(config) => Some(Arc::new(LdapUserDirectory::new(config)?) as Arc<dyn UserDirectory>),
            None => None,
        };

        Ok(Self {
            primary: Arc::new(LdapUserDirectory::new(primary)?),
            secondary,
        })
    }
}

/// Everything a request handler needs, built once at startup
pub struct Services {
    pub directory: Arc<dyn DirectoryProvider>,
    pub self_service: SelfServiceFilter,
    pub users: UserDirectories,
    pub backend: IdentityBackend,
    pub saga: AliasSaga,
    pub resolver: EntityPolicyResolver,
    pub ledger: Arc<AccessKeyLedger>,
    pub credentials: CredentialLifecycle,
}

impl Services {
    /// Wire the services with the Graph directory and portal client from
    /// `settings`
    pub fn build(
        settings: &Settings,
        processor: Arc<dyn RequestProcessor>,
        users: UserDirectories,
    ) -> Result<Self> {
        let timeout = settings.http.timeout();
        let directory: Arc<dyn DirectoryProvider> =
            Arc::new(GraphDirectory::new(settings.directory.clone(), timeout)?);
        let portal: Arc<dyn CredentialPortal> =
            Arc::new(PortalClient::new(settings.portal.clone(), timeout)?);

        Self::with_adapters(settings, processor, directory, portal, users)
    }

    /// Wire the services around already-built adapters
    pub fn with_adapters(
        settings: &Settings,
        processor: Arc<dyn RequestProcessor>,
        directory: Arc<dyn DirectoryProvider>,
        portal: Arc<dyn CredentialPortal>,
        users: UserDirectories,
    ) -> Result<Self> {
        let backend = IdentityBackend::new(processor, settings.backend.clone());
        let self_service = SelfServiceFilter::new(&settings.self_service)?;

        let saga = AliasSaga::new(backend.clone(), directory.clone());
        let resolver = EntityPolicyResolver::new(
            backend.clone(),
            directory.clone(),
            users.primary.clone(),
            users.secondary.clone(),
            settings.resolver.clone(),
        );
        let ledger = Arc::new(AccessKeyLedger::new(backend.clone(), &settings.ledger));
        let credentials = CredentialLifecycle::new(portal, backend.clone(), ledger.clone());

        info!(
            mount_type = %settings.backend.alias_mount_type,
            serialize_ledger_writes = settings.ledger.serialize_writes,
            "Services initialized"
        );

        Ok(Self {
            directory,
            self_service,
            users,
            backend,
            saga,
            resolver,
            ledger,
            credentials,
        })
    }

    /// Groups the user behind `email` administers through self-service
    /// admin groups; empty when the directory is unavailable or the user
    /// is not an admin
    #[instrument(skip(self, ctx), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn self_service_groups(&self, ctx: &RequestContext, email: &str) -> Vec<String> {
        let Some(token) = self.directory.service_token(ctx).await else {
            return Vec::new();
        };
        let Some(user_id) = self
            .directory
            .resolve_user_object_id(ctx, &token, email)
            .await
        else {
            return Vec::new();
        };

        self.self_service
            .groups_for_user(&*self.directory, ctx, &token, &user_id)
            .await
    }

    /// On-premises username for a cloud mail address, via the primary
    /// directory's extension attribute
    #[instrument(skip(self, ctx), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn recover_user_name(&self, ctx: &RequestContext, email: &str) -> Option<String> {
        let token = self.directory.service_token(ctx).await?;
        vaultsync_directory::recover_user_name(
            &*self.directory,
            &*self.users.primary,
            ctx,
            &token,
            email,
        )
        .await
    }
}
