//! vaultsync backend - typed adapter over the identity backend's
//! path-based request contract
//!
//! Groups, aliases, entities, token lookups, mount discovery and generic
//! metadata paths are each a single request. The `testutil` feature adds
//! `MemoryBackend`, an in-memory request processor for tests.

pub mod backend;
pub mod config;
pub mod paths;
mod wire;

#[cfg(any(test, feature = "testutil"))]
pub mod memory;


pub use backend::IdentityBackend;
pub use config::BackendConfig;

#[cfg(any(test, feature = "testutil"))]
pub use memory::MemoryBackend;
