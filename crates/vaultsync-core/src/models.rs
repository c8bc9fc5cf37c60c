//! Domain models shared by the adapters and the reconciliation services

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, VaultSyncError};
use crate::ids::*;

// =============================================================================
// Identity Backend
// =============================================================================

/// Raw outcome of a single identity-backend request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub body: String,
}

impl BackendResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, String::new())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse the body into an endpoint-specific response type
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            VaultSyncError::parse_error(format!("Invalid backend response body: {}", e))
        })
    }

    /// Convert a rejected response into an upstream error
    pub fn into_error(self, operation: &str) -> VaultSyncError {
        let message = if self.body.is_empty() {
            format!("{} failed", operation)
        } else {
            format!("{} failed: {}", operation, self.body)
        };
        VaultSyncError::upstream(self.status, message)
    }
}

/// Identity group as stored in the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub canonical_id: CanonicalId,
    pub policies: Vec<String>,
    pub alias: Option<GroupAlias>,
}

impl Group {
    pub fn external_object_id(&self) -> Option<&ObjectId> {
        self.alias.as_ref().map(|a| &a.external_object_id)
    }

    pub fn mount_accessor(&self) -> Option<&MountAccessor> {
        self.alias.as_ref().map(|a| &a.mount_accessor)
    }
}

/// Binding of a backend group to a directory object under one auth mount.
///
/// The backend allows at most one alias per (`mount_accessor`,
/// `external_object_id`) and has no update-in-place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAlias {
    /// Backend id of the alias itself; absent before creation
    pub id: Option<AliasId>,
    pub canonical_id: CanonicalId,
    pub mount_accessor: MountAccessor,
    pub external_object_id: ObjectId,
}

impl GroupAlias {
    /// Builds an alias only when all three binding values are known and non-empty
    pub fn bind(
        canonical_id: Option<CanonicalId>,
        mount_accessor: Option<MountAccessor>,
        external_object_id: Option<ObjectId>,
    ) -> Option<Self> {
        let canonical_id = canonical_id.filter(|id| !id.is_empty())?;
        let mount_accessor = mount_accessor.filter(|id| !id.is_empty())?;
        let external_object_id = external_object_id.filter(|id| !id.is_empty())?;
        Some(Self {
            id: None,
            canonical_id,
            mount_accessor,
            external_object_id,
        })
    }
}

/// Identity entity resolved through an alias lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub canonical_id: Option<CanonicalId>,
    pub policies: Vec<String>,
    pub mount_accessor: Option<MountAccessor>,
}

/// Policies attached to a client token; read-only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPolicies {
    /// Policies attached directly to the token
    pub policies: Vec<String>,
    /// Policies inherited through group membership
    pub identity_policies: Vec<String>,
}

// =============================================================================
// Directory Provider
// =============================================================================

/// User object returned by a directory lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub extension_attribute: Option<String>,
}

impl DirectoryUser {
    /// Email, if the directory returned a non-blank one
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

// =============================================================================
// Credential Portal
// =============================================================================

/// One live access key as issued by the credential portal.
///
/// The secret is written once into the backend and never read back.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeySecret {
    pub account_id: AccountId,
    pub user_name: String,
    pub access_key_id: AccessKeyId,
    pub access_key_secret: String,
    pub expiry_date_epoch: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
}

impl AccessKeySecret {
    /// Ledger record for this key
    pub fn record(&self) -> AccessKeyRecord {
        AccessKeyRecord::new(self.access_key_id.clone(), self.expiry_date_epoch)
    }
}

impl fmt::Debug for AccessKeySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKeySecret")
            .field("account_id", &self.account_id)
            .field("user_name", &self.user_name)
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"[REDACTED]")
            .field("expiry_date_epoch", &self.expiry_date_epoch)
            .field("status", &self.status)
            .field("create_date", &self.create_date)
            .finish()
    }
}

/// Body of a portal rotate call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateRequest {
    pub access_key_id: AccessKeyId,
    pub user_name: String,
    pub account_id: AccountId,
}

// =============================================================================
// Access-Key Metadata Ledger
// =============================================================================

/// Ledger key: one document per cloud account + service-account name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub account_id: AccountId,
    pub user_name: String,
}

impl LedgerKey {
    pub fn new(account_id: impl Into<AccountId>, user_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            user_name: user_name.into(),
        }
    }

    /// `accountId_userName`, the document name in the backend
    pub fn unique_name(&self) -> String {
        format!("{}_{}", self.account_id, self.user_name)
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_name())
    }
}

/// One access key believed live by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyRecord {
    #[serde(rename = "accessKeyId")]
    pub access_key_id: AccessKeyId,
    #[serde(rename = "expiryDuration")]
    pub expiry_epoch: i64,
}

impl AccessKeyRecord {
    pub fn new(access_key_id: impl Into<AccessKeyId>, expiry_epoch: i64) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            expiry_epoch,
        }
    }
}

/// Metadata document mirrored against the credential portal.
///
/// Fields this core does not own are carried through `extra` untouched so
/// a read-modify-write never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(rename = "isActivated", default)]
    pub is_activated: bool,

    #[serde(default)]
    pub secret: Vec<AccessKeyRecord>,

    #[serde(
        rename = "expiryDateEpoch",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expiry_date_epoch: Option<i64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LedgerDocument {
    /// Flip `isActivated` to true. Returns false when it already was.
    pub fn activate(&mut self) -> bool {
        if self.is_activated {
            return false;
        }
        self.is_activated = true;
        true
    }

    /// Append a key, stamping every record with the new key's expiry.
    ///
    /// A key id already present is not duplicated.
    pub fn add_key(&mut self, record: AccessKeyRecord) {
        for existing in &mut self.secret {
            existing.expiry_epoch = record.expiry_epoch;
        }
        self.expiry_date_epoch = Some(record.expiry_epoch);
        if !self.contains(&record.access_key_id) {
            self.secret.push(record);
        }
    }

    /// Replace `old` with the rotated key id and stamp every record with its expiry
    pub fn rotate_key(&mut self, old: &AccessKeyId, rotated: &AccessKeyRecord) {
        for existing in &mut self.secret {
            if &existing.access_key_id == old {
                existing.access_key_id = rotated.access_key_id.clone();
            }
            existing.expiry_epoch = rotated.expiry_epoch;
        }
        self.expiry_date_epoch = Some(rotated.expiry_epoch);
    }

    /// Drop the record for `access_key_id`. Returns whether one was removed.
    pub fn remove_key(&mut self, access_key_id: &AccessKeyId) -> bool {
        let before = self.secret.len();
        self.secret.retain(|r| &r.access_key_id != access_key_id);
        self.secret.len() != before
    }

    pub fn contains(&self, access_key_id: &AccessKeyId) -> bool {
        self.secret.iter().any(|r| &r.access_key_id == access_key_id)
    }

    pub fn access_key_ids(&self) -> Vec<&AccessKeyId> {
        self.secret.iter().map(|r| &r.access_key_id).collect()
    }

    /// Expiry marker as a timestamp; the portal reports epoch milliseconds
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry_date_epoch
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    /// Fast rotation check off the document-level expiry marker
    pub fn needs_rotation(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}
