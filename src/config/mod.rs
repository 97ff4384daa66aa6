//! Configuration management for the operator.

mod settings;

pub use settings::{
    AppConfig, AuthConfig, AuthMethod, ObservabilityConfig, SyncConfig, VaultConfig,
};
