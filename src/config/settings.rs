//! # Configuration Settings
//!
//! Defines the configuration for the operator. All options come from
//! environment variables, are resolved once at startup into an immutable
//! [`AppConfig`], and are passed by `Arc` to every component.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Namespace file mounted into every pod by the service-account admission
/// controller. Used when `POD_NAMESPACE` is not set.
const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name; prefixes the bootstrap Secret and the `createdBy`
    /// annotation value
    pub app_name: String,

    /// Namespace the operator itself runs in
    pub pod_namespace: String,

    /// Vault connection configuration
    pub vault: VaultConfig,

    /// Vault authentication configuration
    pub auth: AuthConfig,

    /// Secret synchronization configuration
    pub sync: SyncConfig,

    /// Logging and metrics configuration
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Resolve the full configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            app_name: env_or("APP_NAME", "vault-to-k8s"),
            pod_namespace: pod_namespace_from_env()?,
            vault: VaultConfig::from_env(),
            auth: AuthConfig::from_env()?,
            sync: SyncConfig::from_env()?,
            observability: ObservabilityConfig::from_env(),
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if self.pod_namespace.is_empty() {
            return Err(Error::config("Unable to determine pod namespace"));
        }
        self.vault.validate()?;
        self.auth.validate()?;
        self.sync.validate()?;

        Ok(())
    }
}

/// Vault connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault server address (e.g. "https://vault.example.com:8200")
    pub addr: String,

    /// Vault namespace (Enterprise multi-tenancy)
    pub namespace: String,

    /// Path to the synced secrets, of the form `<mount>/<subpath>`
    pub secrets_path: String,
}

impl VaultConfig {
    fn from_env() -> Self {
        let mut secrets_path = env_or("SECRETS_PATH_VAULT", "");
        while secrets_path.ends_with('/') {
            secrets_path.pop();
        }

        Self {
            addr: env_or("VAULT_ADDR", ""),
            namespace: env_or("VAULT_NAMESPACE", ""),
            secrets_path,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.addr.is_empty() {
            return Err(Error::config("Must set variable VAULT_ADDR"));
        }
        if self.namespace.is_empty() {
            return Err(Error::config("Must set variable VAULT_NAMESPACE"));
        }
        if self.secrets_path.is_empty() {
            return Err(Error::config("Must set variable SECRETS_PATH_VAULT"));
        }
        let (mount, subpath) = match self.secrets_path.split_once('/') {
            Some(parts) => parts,
            None => {
                return Err(Error::config(
                    "SECRETS_PATH_VAULT must have the form '<mount>/<subpath>'",
                ))
            }
        };
        if mount.is_empty() || subpath.is_empty() {
            return Err(Error::config(
                "SECRETS_PATH_VAULT must have the form '<mount>/<subpath>'",
            ));
        }

        Ok(())
    }

    /// KV mount component of the secrets path
    pub fn mount(&self) -> &str {
        self.secrets_path.split('/').next().unwrap_or_default()
    }

    /// Subpath under the mount holding the per-namespace directories
    pub fn secrets_root(&self) -> &str {
        self.secrets_path.split_once('/').map(|(_, rest)| rest).unwrap_or_default()
    }
}

/// Supported Vault authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Token,
    Approle,
}

impl AuthMethod {
    /// Mount name of the auth method, as used in `auth/<method>/...` paths
    pub fn mount(&self) -> &'static str {
        match self {
            AuthMethod::Token => "token",
            AuthMethod::Approle => "approle",
        }
    }
}

/// Vault authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Selected auth method
    pub method: AuthMethod,

    /// Static token for the `token` auth method
    pub token: Option<String>,

    /// AppRole RoleID
    pub role_id: String,

    /// Single-use wrapped token that unwraps to a SecretID. Resolved from
    /// `APPROLE_SECRET_ID_WRAPPED_TOKEN_FILE` when the file variant is set.
    pub wrapped_token: Option<String>,

    /// Token rotation interval in seconds; 0 disables, -1 derives 0.7 * TTL
    pub token_rotation_interval: i64,

    /// SecretID rotation interval in seconds; 0 disables, -1 derives 0.7 * TTL
    pub secret_id_rotation_interval: i64,
}

impl AuthConfig {
    fn from_env() -> Result<Self> {
        let method = match env_or("AUTH_METHOD", "").as_str() {
            "token" => AuthMethod::Token,
            "approle" => AuthMethod::Approle,
            "" => {
                return Err(Error::config(
                    "You must provide an auth method. Parameter AUTH_METHOD can be \"token\" or \"approle\"",
                ))
            }
            other => {
                return Err(Error::config(format!(
                    "Incorrect value '{}' for AUTH_METHOD, can be \"token\" or \"approle\"",
                    other
                )))
            }
        };

        let wrapped_token_file = env_or("APPROLE_SECRET_ID_WRAPPED_TOKEN_FILE", "");
        let wrapped_token = if wrapped_token_file.is_empty() {
            let inline = env_or("APPROLE_SECRET_ID_WRAPPED_TOKEN", "");
            (!inline.is_empty()).then_some(inline)
        } else {
            let data = std::fs::read_to_string(&wrapped_token_file).map_err(|e| {
                Error::io(
                    format!(
                        "Failed to get AppRole Secret ID wrapped token from file '{}'",
                        wrapped_token_file
                    ),
                    e,
                )
            })?;
            Some(data.trim().to_string())
        };

        Ok(Self {
            method,
            token: {
                let token = env_or("VAULT_TOKEN", "");
                (!token.is_empty()).then_some(token)
            },
            role_id: env_or("APPROLE_ROLE_ID", ""),
            wrapped_token,
            token_rotation_interval: env_i64("TOKEN_ROTATION_INTERVAL", -1)?,
            secret_id_rotation_interval: env_i64("APPROLE_SECRETID_ROTATION_INTERVAL", -1)?,
        })
    }

    fn validate(&self) -> Result<()> {
        match self.method {
            AuthMethod::Token => {
                if self.token.is_none() {
                    return Err(Error::config(
                        "VAULT_TOKEN should be defined for \"token\" auth method",
                    ));
                }
            }
            AuthMethod::Approle => {
                if self.role_id.is_empty() {
                    return Err(Error::config(
                        "APPROLE_ROLE_ID should be defined for \"approle\" auth method",
                    ));
                }
                if self.wrapped_token.is_none() {
                    return Err(Error::config(
                        "APPROLE_SECRET_ID_WRAPPED_TOKEN should be defined for \"approle\" auth method",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Secret synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of workers per namespace fan-out
    pub num_workers: usize,

    /// Seconds between sync ticks
    pub interval_secs: u64,

    /// Name of the Kubernetes cluster the operator runs in
    pub cluster_name: String,

    /// Namespaces that additionally receive mutable, suffix-stripped Secrets
    pub non_versioning_namespaces: Vec<String>,

    /// Annotation key marking Secrets as operator-owned
    pub annotation_name: String,
}

impl SyncConfig {
    fn from_env() -> Result<Self> {
        let non_versioning = env_or("NON_VERSIONING_NAMESPACES", "");

        Ok(Self {
            num_workers: env_i64("NUM_WORKERS", 1)?.max(1) as usize,
            interval_secs: env_i64("SYNC_INTERVAL", 300)?.max(1) as u64,
            cluster_name: env_or("K8S_CLUSTER_NAME", ""),
            non_versioning_namespaces: non_versioning
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            annotation_name: env_or("ANNOTATION_NAME", "vault-to-k8s/secret"),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(Error::config("Must set variable K8S_CLUSTER_NAME"));
        }

        Ok(())
    }

    /// Entry-name suffix addressing this cluster, `.<clusterName>`
    pub fn cluster_suffix(&self) -> String {
        format!(".{}", self.cluster_name)
    }

    /// Interval between sync ticks as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable the Prometheus exporter
    pub enable_metrics: bool,

    /// Address on which to expose metrics
    pub listen_address: String,

    /// Path under which metrics are exposed
    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: true,
            listen_address: "0.0.0.0:9703".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl ObservabilityConfig {
    fn from_env() -> Self {
        let log_level = if env_or("DEBUG", "false") == "true" {
            "debug".to_string()
        } else {
            env_or("LOG_LEVEL", "info")
        };

        Self {
            log_level,
            json_logging: env_or("LOG_JSON", "false") == "true",
            enable_metrics: env_or("PROMETHEUS_METRICS", "true") == "true",
            listen_address: normalize_listen_address(&env_or(
                "PROMETHEUS_LISTEN_ADDRESS",
                "0.0.0.0:9703",
            )),
            metrics_path: env_or("PROMETHEUS_METRICS_PATH", "/metrics"),
        }
    }

    /// Get the metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<&str> {
        self.enable_metrics.then_some(self.listen_address.as_str())
    }
}

/// Accepts the `:9703` shorthand and pins it to all interfaces.
fn normalize_listen_address(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{}", port)
    } else {
        addr.to_string()
    }
}

/// Get a string environment variable or return the default value
fn env_or(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

/// Get an integer environment variable or return the default value
fn env_i64(name: &str, default: i64) -> Result<i64> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse::<i64>()
            .map_err(|e| Error::config(format!("Invalid value '{}' for {}: {}", value, name, e))),
        _ => Ok(default),
    }
}

/// Discover the operator's own namespace, falling back to the mounted
/// service-account file.
fn pod_namespace_from_env() -> Result<String> {
    let from_env = env_or("POD_NAMESPACE", "");
    if !from_env.is_empty() {
        return Ok(from_env);
    }

    let data = std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE)
        .map_err(|e| Error::io(format!("Failed to read '{}'", SERVICE_ACCOUNT_NAMESPACE_FILE), e))?;
    let namespace = data.trim();
    if namespace.is_empty() {
        return Err(Error::config(format!(
            "Namespace file '{}' is empty",
            SERVICE_ACCOUNT_NAMESPACE_FILE
        )));
    }

    Ok(namespace.to_string())
}
