//! vaultsync reconcile - multi-step operations across the identity
//! backend, the directory provider and the credential portal
//!
//! This crate provides:
//! - `AliasSaga`: policy replacement for directory-aliased groups
//! - `EntityPolicyResolver`: effective policies of a user's entity
//! - `AccessKeyLedger`: per-account metadata of issued access keys
//! - `CredentialLifecycle`: portal calls kept in step with the ledger
//!
//! Steps run strictly in sequence and nothing is retried.

pub mod alias_saga;
pub mod credentials;
pub mod entity_policy;
pub mod ledger;

#[cfg(test)]
mod tests;

pub use alias_saga::{AliasBinding, AliasSaga, Compensation, SagaFailure, SagaStep};
pub use credentials::CredentialLifecycle;
pub use entity_policy::{CallerIdentity, EntityPolicyResolver, ResolvedEntity, ResolverConfig};
pub use ledger::{AccessKeyLedger, LedgerConfig};
