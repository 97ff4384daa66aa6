//! Typed Vault operations used by the operator.
//!
//! Wraps the `vaultrs` client behind the [`VaultOps`] trait so the
//! credential lifecycle and the sync engine can be exercised against
//! in-memory fakes. The production [`VaultHandle`] keeps the client behind
//! an `RwLock`: rotation swaps the auth token while the sync engine shares
//! the client read-mostly.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::{kv2, sys, token};

use crate::config::VaultConfig;
use crate::errors::{Error, Result};

/// Outcome of an AppRole login
#[derive(Debug, Clone)]
pub struct Login {
    pub client_token: String,
    pub accessor: String,
    /// Token TTL in seconds, from the lease duration
    pub lease_duration: u64,
    /// Role name reported in the auth metadata
    pub role_name: String,
}

/// Result of a SecretID lookup
#[derive(Debug, Clone)]
pub struct SecretIdInfo {
    pub accessor: String,
    /// SecretID TTL in seconds
    pub ttl: u64,
    /// Creation time as a unix timestamp
    pub creation_time: i64,
}

/// A mount as reported by the mounts listing
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub kind: String,
    pub options: HashMap<String, String>,
}

/// A versioned KV entry read from Vault
#[derive(Debug, Clone)]
pub struct VaultEntry {
    pub version: u64,
    pub data: HashMap<String, serde_json::Value>,
}

/// Typed Vault operations needed by the operator
#[async_trait]
pub trait VaultOps: Send + Sync {
    /// Set the auth token used for subsequent calls
    async fn set_token(&self, token: &str);

    /// Unwrap a single-use wrapped token into a SecretID
    async fn unwrap_secret_id(&self, wrapped_token: &str) -> Result<String>;

    /// Exchange RoleID + SecretID for a token
    async fn login(&self, mount: &str, role_id: &str, secret_id: &str) -> Result<Login>;

    /// Mint a new SecretID for the role
    async fn generate_secret_id(&self, mount: &str, role_name: &str) -> Result<String>;

    /// Look up a SecretID; `None` means there is nothing to revoke
    async fn lookup_secret_id(
        &self,
        mount: &str,
        role_name: &str,
        secret_id: &str,
    ) -> Result<Option<SecretIdInfo>>;

    /// Destroy a SecretID by its accessor
    async fn destroy_secret_id_accessor(
        &self,
        mount: &str,
        role_name: &str,
        accessor: &str,
    ) -> Result<()>;

    /// Revoke a token by its accessor. An accessor Vault no longer knows
    /// counts as already revoked.
    async fn revoke_token_accessor(&self, accessor: &str) -> Result<()>;

    /// List all mounts
    async fn list_mounts(&self) -> Result<HashMap<String, MountInfo>>;

    /// List keys under a KV v2 metadata path. Directories keep their
    /// trailing `/`. A missing path yields an empty list.
    async fn list_keys(&self, mount: &str, path: &str) -> Result<Vec<String>>;

    /// Read the current version of a KV v2 entry; `None` when the entry or
    /// its data is gone
    async fn read_entry(&self, mount: &str, path: &str) -> Result<Option<VaultEntry>>;
}

/// Payload of an unwrapped AppRole SecretID response
#[derive(Debug, Deserialize)]
struct WrappedSecretId {
    secret_id: String,
}

/// Production [`VaultOps`] implementation backed by `vaultrs`
pub struct VaultHandle {
    client: RwLock<VaultClient>,
}

impl VaultHandle {
    /// Connect to Vault and verify it is reachable.
    pub async fn connect(config: &VaultConfig) -> Result<Self> {
        let settings = VaultClientSettingsBuilder::default()
            .address(&config.addr)
            .namespace(Some(config.namespace.clone()))
            .timeout(Some(Duration::from_secs(30)))
            .build()
            .map_err(|e| Error::config(format!("Invalid Vault configuration: {}", e)))?;

        let client = VaultClient::new(settings)
            .map_err(|e| Error::vault("Failed to create Vault client", e))?;

        sys::health(&client)
            .await
            .map_err(|e| Error::vault(format!("Vault at '{}' is unreachable", config.addr), e))?;
        tracing::info!(address = %config.addr, "Connected to Vault");

        Ok(Self { client: RwLock::new(client) })
    }
}

#[async_trait]
impl VaultOps for VaultHandle {
    async fn set_token(&self, token: &str) {
        self.client.write().await.set_token(token);
    }

    async fn unwrap_secret_id(&self, wrapped_token: &str) -> Result<String> {
        let client = self.client.read().await;
        let payload: WrappedSecretId = sys::wrapping::unwrap(&*client, Some(wrapped_token))
            .await
            .map_err(|e| Error::vault("Failed to unwrap SecretID from wrapped token", e))?;

        Ok(payload.secret_id)
    }

    async fn login(&self, mount: &str, role_id: &str, secret_id: &str) -> Result<Login> {
        let client = self.client.read().await;
        let auth = approle::login(&*client, mount, role_id, secret_id)
            .await
            .map_err(|e| Error::vault("AppRole login failed", e))?;

        Ok(Login {
            client_token: auth.client_token,
            accessor: auth.accessor,
            lease_duration: auth.lease_duration,
            role_name: role_name_from_metadata(auth.metadata),
        })
    }

    async fn generate_secret_id(&self, mount: &str, role_name: &str) -> Result<String> {
        let client = self.client.read().await;
        let response = approle::role::secret::generate(&*client, mount, role_name, None)
            .await
            .map_err(|e| Error::vault("Failed to generate new SecretID", e))?;

        Ok(response.secret_id)
    }

    async fn lookup_secret_id(
        &self,
        mount: &str,
        role_name: &str,
        secret_id: &str,
    ) -> Result<Option<SecretIdInfo>> {
        let client = self.client.read().await;
        let response = match approle::role::secret::read(&*client, mount, role_name, secret_id)
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(Error::vault("SecretID lookup failed", e)),
        };

        Ok(Some(SecretIdInfo {
            accessor: response.secret_id_accessor,
            ttl: response.secret_id_ttl,
            creation_time: parse_creation_time(&response.creation_time)?,
        }))
    }

    async fn destroy_secret_id_accessor(
        &self,
        mount: &str,
        role_name: &str,
        accessor: &str,
    ) -> Result<()> {
        let client = self.client.read().await;
        approle::role::secret::delete_accessor(&*client, mount, role_name, accessor)
            .await
            .map_err(|e| Error::vault("Failed to destroy SecretID accessor", e))
    }

    async fn revoke_token_accessor(&self, accessor: &str) -> Result<()> {
        let client = self.client.read().await;
        match token::revoke_accessor(&*client, accessor).await {
            Ok(()) => Ok(()),
            Err(e) if is_invalid_accessor(&e) => {
                tracing::debug!(accessor, "No valid token for accessor, nothing to revoke");
                Ok(())
            }
            Err(e) => Err(Error::vault("Failed to revoke token by accessor", e)),
        }
    }

    async fn list_mounts(&self) -> Result<HashMap<String, MountInfo>> {
        let client = self.client.read().await;
        let mounts = sys::mount::list(&*client)
            .await
            .map_err(|e| Error::vault("Failed to list Vault mounts", e))?;

        Ok(mounts
            .into_iter()
            .map(|(path, mount)| {
                (
                    path,
                    MountInfo {
                        kind: mount.mount_type,
                        options: mount.options.unwrap_or_default(),
                    },
                )
            })
            .collect())
    }

    async fn list_keys(&self, mount: &str, path: &str) -> Result<Vec<String>> {
        let client = self.client.read().await;
        match kv2::list(&*client, mount, path).await {
            Ok(keys) => Ok(keys),
            Err(e) if is_not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(Error::vault(format!("Failed to list '{}/{}'", mount, path), e)),
        }
    }

    async fn read_entry(&self, mount: &str, path: &str) -> Result<Option<VaultEntry>> {
        let client = self.client.read().await;
        let metadata = match kv2::read_metadata(&*client, mount, path).await {
            Ok(metadata) => metadata,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(Error::vault(format!("Failed to read '{}/{}' metadata", mount, path), e))
            }
        };

        let version = metadata.current_version;
        let data: HashMap<String, serde_json::Value> =
            match kv2::read_version(&*client, mount, path, version).await {
                Ok(data) => data,
                Err(e) if is_not_found(&e) => return Ok(None),
                Err(e) => {
                    return Err(Error::vault(format!("Failed to read '{}/{}'", mount, path), e))
                }
            };

        Ok(Some(VaultEntry { version, data }))
    }
}

fn role_name_from_metadata(metadata: Option<HashMap<String, String>>) -> String {
    metadata.and_then(|m| m.get("role_name").cloned()).unwrap_or_default()
}

/// Parse the RFC 3339 `creation_time` of a SecretID lookup into a unix
/// timestamp.
fn parse_creation_time(raw: &str) -> Result<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| Error::auth(format!("Invalid SecretID creation_time '{}': {}", raw, e)))
}

fn is_not_found(err: &ClientError) -> bool {
    matches!(err, ClientError::APIError { code: 404, .. })
}

fn is_invalid_accessor(err: &ClientError) -> bool {
    match err {
        ClientError::APIError { errors, .. } => {
            errors.iter().any(|message| message.contains("invalid accessor"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_name_from_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("role_name".to_string(), "vault-to-k8s".to_string());
        assert_eq!(role_name_from_metadata(Some(metadata)), "vault-to-k8s");

        assert_eq!(role_name_from_metadata(Some(HashMap::new())), "");
        assert_eq!(role_name_from_metadata(None), "");
    }

    #[test]
    fn test_parse_creation_time() {
        let ts = parse_creation_time("2023-04-05T06:07:08Z").unwrap();
        assert_eq!(ts, 1680674828);

        assert!(parse_creation_time("not-a-timestamp").is_err());
    }

    #[test]
    fn test_invalid_accessor_detection() {
        let err = ClientError::APIError {
            code: 400,
            errors: vec!["1 error occurred:\n\t* invalid accessor\n".to_string()],
        };
        assert!(is_invalid_accessor(&err));

        let err = ClientError::APIError { code: 403, errors: vec!["permission denied".into()] };
        assert!(!is_invalid_accessor(&err));
    }
}
