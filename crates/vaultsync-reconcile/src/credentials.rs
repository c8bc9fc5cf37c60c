//! Access-key lifecycle: portal call, secret storage, then the ledger

use std::sync::Arc;
use tracing::{info, instrument};

use vaultsync_backend::IdentityBackend;
use vaultsync_core::{
    AccessKeyId, AccessKeySecret, AccountId, CredentialPortal, LedgerDocument, LedgerKey,
    RequestContext, Result, RotateRequest,
};

use crate::ledger::AccessKeyLedger;

/// Keeps portal-issued keys, their stored secrets and the ledger in step.
///
/// The portal is always called first. If a later backend write fails the
/// key exists in the portal but not in the ledger; the error is returned
/// and nothing is undone.
pub struct CredentialLifecycle {
    portal: Arc<dyn CredentialPortal>,
    backend: IdentityBackend,
    ledger: Arc<AccessKeyLedger>,
}

impl CredentialLifecycle {
    pub fn new(
        portal: Arc<dyn CredentialPortal>,
        backend: IdentityBackend,
        ledger: Arc<AccessKeyLedger>,
    ) -> Self {
        Self {
            portal,
            backend,
            ledger,
        }
    }

    pub fn ledger(&self) -> &AccessKeyLedger {
        &self.ledger
    }

    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        token: &str,
        account_id: &AccountId,
        user_name: &str,
    ) -> Result<AccessKeySecret> {
        let secret = self
            .portal
            .create_access_key(ctx, account_id, user_name)
            .await?;
        self.backend.write_secret(ctx, token, &secret).await?;

        let key = LedgerKey::new(account_id.clone(), user_name);
        self.ledger.add_key(ctx, token, &key, secret.record()).await?;

        info!(access_key_id = %secret.access_key_id, "Access key issued");
        Ok(secret)
    }

    #[instrument(skip(self, ctx, token, request), fields(user = %ctx.user, request_id = %ctx.request_id, access_key_id = %request.access_key_id))]
    pub async fn rotate(
        &self,
        ctx: &RequestContext,
        token: &str,
        request: &RotateRequest,
    ) -> Result<AccessKeySecret> {
        let secret = self.portal.rotate_secret(ctx, request).await?;
        self.backend.write_secret(ctx, token, &secret).await?;

        let key = LedgerKey::new(request.account_id.clone(), request.user_name.clone());
        self.ledger
            .rotate_key(ctx, token, &key, &request.access_key_id, secret.record())
            .await?;

        info!(new_access_key_id = %secret.access_key_id, "Access key rotated");
        Ok(secret)
    }

    /// Delete from the portal, then prune the ledger
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id))]
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        token: &str,
        account_id: &AccountId,
        user_name: &str,
        access_key_id: &AccessKeyId,
    ) -> Result<LedgerDocument> {
        self.portal
            .delete_access_key(ctx, account_id, user_name, access_key_id)
            .await?;

        let key = LedgerKey::new(account_id.clone(), user_name);
        self.ledger.delete_key(ctx, token, &key, access_key_id).await
    }

    pub async fn activate(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
    ) -> Result<LedgerDocument> {
        self.ledger.activate(ctx, token, key).await
    }
}
