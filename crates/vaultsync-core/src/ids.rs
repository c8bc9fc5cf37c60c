//! Strongly-typed identifiers for records held by the three external stores
//!
//! Every id here is opaque text minted by someone else (the identity
//! backend, the directory provider or the credential portal), so the
//! wrappers only guard against mixing them up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate string-backed ID wrappers
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }

            /// Empty ids are treated as absent by every caller.
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }

            /// Returns `None` for blank values so they never reach a write.
            pub fn non_empty(value: impl Into<String>) -> Option<Self> {
                let id = Self::new(value);
                if id.is_empty() {
                    None
                } else {
                    Some(id)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Identity-backend internal id of a group or entity
    CanonicalId
);
define_id!(
    /// Id of the auth mount that alias bindings are scoped to
    MountAccessor
);
define_id!(
    /// Directory-provider object id of a group or user
    ObjectId
);
define_id!(
    /// Identity-backend id of a group alias
    AliasId
);
define_id!(
    /// Credential-portal access key id
    AccessKeyId
);
define_id!(
    /// Cloud account id owning a service account
    AccountId
);
