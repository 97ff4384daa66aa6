//! Vault integration: typed client operations and mount validation.

pub mod client;
pub mod mount;

pub use client::{Login, MountInfo, SecretIdInfo, VaultEntry, VaultHandle, VaultOps};
pub use mount::{verify_mount, verify_vault_mount};
