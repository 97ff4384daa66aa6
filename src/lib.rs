//! # vault-to-k8s
//!
//! A long-running operator that propagates versioned KV secrets from
//! HashiCorp Vault into Kubernetes Secret objects, and maintains its own
//! Vault AppRole credentials along the way.
//!
//! ## Architecture
//!
//! ```text
//! Vault KV v2  ──read──►  Sync Engine ──create/update──►  Cluster Secrets
//!      ▲                      │
//!      │                 worker pool (per-namespace fan-out)
//! Credential Lifecycle ──────┴── Bootstrap Secret (accessors, SecretID)
//! ```
//!
//! ## Core Components
//!
//! - **Credential Lifecycle**: AppRole authentication, token and SecretID
//!   rotation, revocation of predecessors
//! - **Sync Engine**: periodic namespace discovery, entry filtering, and
//!   concurrent per-entry reconciliation with annotation-guarded ownership
//! - **Bootstrap Store**: the operator's self-owned Secret persisting
//!   accessors across restarts

pub mod auth;
pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod observability;
pub mod sync;
pub mod vault;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
