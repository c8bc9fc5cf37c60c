//! Access-Key Metadata Ledger
//!
//! One metadata document per account and service-account name, mirroring
//! which access keys the credential portal has issued. Every operation is
//! a read-modify-write of the whole document with no version check, so two
//! callers racing on one document can lose an update. Turning on
//! `serialize_writes` closes that window within this process only.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use vaultsync_backend::IdentityBackend;
use vaultsync_core::{
    AccessKeyId, AccessKeyRecord, LedgerDocument, LedgerKey, RequestContext, Result,
    VaultSyncError,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Serialize read-modify-write cycles per document in this process
    pub serialize_writes: bool,
}

/// Per-document async locks. An entry lives only while some caller holds
/// or waits on it.
#[derive(Default)]
struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyedGuard {
            locks: &self.locks,
            key: key.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct KeyedGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits on it
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct AccessKeyLedger {
    backend: IdentityBackend,
    locks: Option<KeyedLocks>,
}

impl AccessKeyLedger {
    pub fn new(backend: IdentityBackend, config: &LedgerConfig) -> Self {
        Self {
            backend,
            locks: config.serialize_writes.then(KeyedLocks::default),
        }
    }

    /// Current document; a missing document reads as a fresh, empty ledger
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id, ledger = %key))]
    pub async fn read(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
    ) -> Result<LedgerDocument> {
        Ok(self.load(ctx, token, key).await?.unwrap_or_default())
    }

    /// Whether the ledger's expiry marker has passed
    pub async fn needs_rotation(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.read(ctx, token, key).await?.needs_rotation(now))
    }

    /// Set `isActivated`. An already-active document is returned unwritten.
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id, ledger = %key))]
    pub async fn activate(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
    ) -> Result<LedgerDocument> {
        let _guard = self.guard(key).await;
        let mut document = self.load(ctx, token, key).await?.unwrap_or_default();

        if !document.activate() {
            debug!("Already activated");
            return Ok(document);
        }

        self.store(ctx, token, key, &document).await?;
        info!("Activated");
        Ok(document)
    }

    /// Append a key and stamp every record with its expiry
    #[instrument(skip(self, ctx, token, record), fields(user = %ctx.user, request_id = %ctx.request_id, ledger = %key, access_key_id = %record.access_key_id))]
    pub async fn add_key(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
        record: AccessKeyRecord,
    ) -> Result<LedgerDocument> {
        let _guard = self.guard(key).await;
        let mut document = self.load(ctx, token, key).await?.unwrap_or_default();

        document.add_key(record);
        self.store(ctx, token, key, &document).await?;
        info!(keys = document.secret.len(), "Recorded access key");
        Ok(document)
    }

    /// Replace `old` with the rotated key. A missing document is
    /// `NotFound` and nothing is written.
    #[instrument(skip(self, ctx, token, rotated), fields(user = %ctx.user, request_id = %ctx.request_id, ledger = %key, new_access_key_id = %rotated.access_key_id))]
    pub async fn rotate_key(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
        old: &AccessKeyId,
        rotated: AccessKeyRecord,
    ) -> Result<LedgerDocument> {
        let _guard = self.guard(key).await;
        let Some(mut document) = self.load(ctx, token, key).await? else {
            warn!("No ledger document to record the rotation in");
            return Err(VaultSyncError::not_found("ledger", key.to_string()));
        };

        if !document.contains(old) {
            debug!(%old, "Rotated key not in ledger, stamping expiry only");
        }
        document.rotate_key(old, &rotated);
        self.store(ctx, token, key, &document).await?;
        info!("Recorded rotation");
        Ok(document)
    }

    /// Drop one key. Unknown ids and missing documents leave the ledger
    /// as it is.
    #[instrument(skip(self, ctx, token), fields(user = %ctx.user, request_id = %ctx.request_id, ledger = %key))]
    pub async fn delete_key(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
        access_key_id: &AccessKeyId,
    ) -> Result<LedgerDocument> {
        let _guard = self.guard(key).await;
        let Some(mut document) = self.load(ctx, token, key).await? else {
            debug!("No ledger document");
            return Ok(LedgerDocument::default());
        };

        if !document.remove_key(access_key_id) {
            debug!("Key not in ledger");
            return Ok(document);
        }

        self.store(ctx, token, key, &document).await?;
        info!(keys = document.secret.len(), "Removed access key");
        Ok(document)
    }

    async fn guard(&self, key: &LedgerKey) -> Option<KeyedGuard<'_>> {
        match &self.locks {
            Some(locks) => Some(locks.lock(&key.unique_name()).await),
            None => None,
        }
    }

    /// Documents with a live per-document lock
    #[cfg(test)]
    pub(crate) fn locked_documents(&self) -> usize {
        self.locks.as_ref().map_or(0, KeyedLocks::len)
    }

    async fn load(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
    ) -> Result<Option<LedgerDocument>> {
        let path = self.backend.metadata_path(key);
        match self.backend.read_path(ctx, token, &path).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.upstream_status() == Some(http::StatusCode::NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn store(
        &self,
        ctx: &RequestContext,
        token: &str,
        key: &LedgerKey,
        document: &LedgerDocument,
    ) -> Result<()> {
        let path = self.backend.metadata_path(key);
        self.backend.write_path(ctx, token, &path, document).await
    }
}
