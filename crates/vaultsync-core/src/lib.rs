//! vaultsync core - domain types and collaborator traits for identity-alias
//! and credential-lifecycle reconciliation

pub mod client;
pub mod context;
pub mod error;
pub mod ids;
pub mod models;
pub mod traits;


pub use context::*;
pub use error::*;
pub use ids::*;
pub use models::*;
pub use traits::*;
