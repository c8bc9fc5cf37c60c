//! vaultsync portal - client for the cloud credential portal that issues,
//! rotates and revokes access keys for service accounts
//!
//! Every call authenticates afresh with the portal's app-role login. The
//! token is sent base64-encoded behind the configured header prefix.

pub mod client;
pub mod config;


pub use client::PortalClient;
pub use config::PortalConfig;
