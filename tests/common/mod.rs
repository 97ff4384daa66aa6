//! Common test utilities for all integration tests.
//!
//! Provides in-memory Vault and cluster fakes implementing the operator's
//! client traits, plus a ready-made test configuration.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use vaultrs::error::ClientError;

use vault_to_k8s::cluster::{ClusterOps, ClusterSecret};
use vault_to_k8s::config::{
    AppConfig, AuthConfig, AuthMethod, ObservabilityConfig, SyncConfig, VaultConfig,
};
use vault_to_k8s::errors::{Error, Result};
use vault_to_k8s::vault::{Login, MountInfo, SecretIdInfo, VaultEntry, VaultOps};

/// Configuration matching the fixtures used throughout these tests
pub fn test_config() -> AppConfig {
    AppConfig {
        app_name: "vault-to-k8s".to_string(),
        pod_namespace: "operators".to_string(),
        vault: VaultConfig {
            addr: "http://127.0.0.1:8200".to_string(),
            namespace: "vault-ns".to_string(),
            secrets_path: "k8s/dev".to_string(),
        },
        auth: AuthConfig {
            method: AuthMethod::Approle,
            token: None,
            role_id: "test-role-id".to_string(),
            wrapped_token: Some("wrapped-token-1".to_string()),
            token_rotation_interval: -1,
            secret_id_rotation_interval: -1,
        },
        sync: SyncConfig {
            num_workers: 3,
            interval_secs: 300,
            cluster_name: "k8s-cluster".to_string(),
            non_versioning_namespaces: vec!["k8s-ns2".to_string()],
            annotation_name: "vault-to-k8s/secret".to_string(),
        },
        observability: ObservabilityConfig::default(),
    }
}

#[derive(Debug, Clone)]
struct SecretIdRecord {
    accessor: String,
    ttl: u64,
    creation_time: i64,
    destroyed: bool,
}

#[derive(Debug, Default)]
struct VaultState {
    /// Entries keyed by (mount, path relative to the mount)
    entries: HashMap<(String, String), VaultEntry>,
    mounts: HashMap<String, MountInfo>,
    /// Single-use wrapped tokens mapping to SecretIDs
    wrapped: HashMap<String, String>,
    secret_ids: HashMap<String, SecretIdRecord>,
    /// Token accessor -> revoked
    tokens: HashMap<String, bool>,
    tokens_set: Vec<String>,
    fail_reads: HashSet<(String, String)>,
    role_id: String,
    role_name: String,
    lease_duration: u64,
    secret_id_ttl: u64,
    login_count: u64,
    mint_count: u64,
}

/// In-memory Vault standing in for the real API
pub struct FakeVault {
    state: Mutex<VaultState>,
}

impl FakeVault {
    pub fn new() -> Self {
        let mut state = VaultState {
            role_id: "test-role-id".to_string(),
            role_name: "vault-to-k8s".to_string(),
            lease_duration: 3600,
            secret_id_ttl: 7200,
            ..Default::default()
        };
        state.mounts.insert(
            "k8s/".to_string(),
            MountInfo {
                kind: "kv".to_string(),
                options: HashMap::from([("version".to_string(), "2".to_string())]),
            },
        );

        Self { state: Mutex::new(state) }
    }

    /// Store a KV entry. `path` is relative to the mount, e.g.
    /// `dev/k8s-ns1/secret1`.
    pub fn put_entry(&self, mount: &str, path: &str, version: u64, data: serde_json::Value) {
        let data = data
            .as_object()
            .expect("entry data must be a JSON object")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.state.lock().unwrap().entries.insert(
            (mount.to_string(), path.to_string()),
            VaultEntry { version, data },
        );
    }

    /// Register a single-use wrapped token that unwraps to `secret_id`, and
    /// make that SecretID valid for login.
    pub fn put_wrapped_token(&self, wrapped: &str, secret_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.wrapped.insert(wrapped.to_string(), secret_id.to_string());
        let accessor = format!("{}-accessor", secret_id);
        let ttl = state.secret_id_ttl;
        state.secret_ids.insert(
            secret_id.to_string(),
            SecretIdRecord {
                accessor,
                ttl,
                creation_time: chrono::Utc::now().timestamp(),
                destroyed: false,
            },
        );
    }

    /// Register a valid SecretID without a wrapped token (as if minted
    /// earlier).
    pub fn put_secret_id(&self, secret_id: &str) {
        let mut state = self.state.lock().unwrap();
        let accessor = format!("{}-accessor", secret_id);
        let ttl = state.secret_id_ttl;
        state.secret_ids.insert(
            secret_id.to_string(),
            SecretIdRecord {
                accessor,
                ttl,
                creation_time: chrono::Utc::now().timestamp(),
                destroyed: false,
            },
        );
    }

    /// Register a token accessor Vault knows about, as if issued by an
    /// earlier process instance.
    pub fn put_token_accessor(&self, accessor: &str) {
        self.state.lock().unwrap().tokens.insert(accessor.to_string(), false);
    }

    /// Make reads of one entry fail, to exercise the namespace-fatal path.
    pub fn fail_reads_of(&self, mount: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_reads
            .insert((mount.to_string(), path.to_string()));
    }

    pub fn secret_id_valid(&self, secret_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .secret_ids
            .get(secret_id)
            .map(|record| !record.destroyed)
            .unwrap_or(false)
    }

    pub fn token_revoked(&self, accessor: &str) -> bool {
        self.state.lock().unwrap().tokens.get(accessor).copied().unwrap_or(false)
    }

    /// Token last written to the client with `set_token`
    pub fn current_token(&self) -> Option<String> {
        self.state.lock().unwrap().tokens_set.last().cloned()
    }

    pub fn login_count(&self) -> u64 {
        self.state.lock().unwrap().login_count
    }

    pub fn mint_count(&self) -> u64 {
        self.state.lock().unwrap().mint_count
    }
}

fn api_error(code: u16, message: &str) -> ClientError {
    ClientError::APIError { code: code.into(), errors: vec![message.to_string()] }
}

#[async_trait]
impl VaultOps for FakeVault {
    async fn set_token(&self, token: &str) {
        self.state.lock().unwrap().tokens_set.push(token.to_string());
    }

    async fn unwrap_secret_id(&self, wrapped_token: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.wrapped.remove(wrapped_token).ok_or_else(|| {
            Error::vault(
                "Failed to unwrap SecretID from wrapped token",
                api_error(400, "wrapping token is not valid or does not exist"),
            )
        })
    }

    async fn login(&self, _mount: &str, role_id: &str, secret_id: &str) -> Result<Login> {
        let mut state = self.state.lock().unwrap();
        if role_id != state.role_id {
            return Err(Error::vault("AppRole login failed", api_error(400, "invalid role id")));
        }
        let valid = state
            .secret_ids
            .get(secret_id)
            .map(|record| !record.destroyed)
            .unwrap_or(false);
        if !valid {
            return Err(Error::vault("AppRole login failed", api_error(400, "invalid secret id")));
        }

        state.login_count += 1;
        let serial = state.login_count;
        let token = format!("token-{}", serial);
        let accessor = format!("token-accessor-{}", serial);
        state.tokens.insert(accessor.clone(), false);

        Ok(Login {
            client_token: token,
            accessor,
            lease_duration: state.lease_duration,
            role_name: state.role_name.clone(),
        })
    }

    async fn generate_secret_id(&self, _mount: &str, _role_name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.mint_count += 1;
        let secret_id = format!("secret-id-{}", state.mint_count);
        let accessor = format!("{}-accessor", secret_id);
        let record = SecretIdRecord {
            accessor,
            ttl: state.secret_id_ttl,
            creation_time: chrono::Utc::now().timestamp(),
            destroyed: false,
        };
        state.secret_ids.insert(secret_id.clone(), record);

        Ok(secret_id)
    }

    async fn lookup_secret_id(
        &self,
        _mount: &str,
        _role_name: &str,
        secret_id: &str,
    ) -> Result<Option<SecretIdInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .secret_ids
            .get(secret_id)
            .filter(|record| !record.destroyed)
            .map(|record| SecretIdInfo {
                accessor: record.accessor.clone(),
                ttl: record.ttl,
                creation_time: record.creation_time,
            }))
    }

    async fn destroy_secret_id_accessor(
        &self,
        _mount: &str,
        _role_name: &str,
        accessor: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for record in state.secret_ids.values_mut() {
            if record.accessor == accessor {
                record.destroyed = true;
                return Ok(());
            }
        }

        Err(Error::vault(
            "Failed to destroy SecretID accessor",
            api_error(404, "accessor not found"),
        ))
    }

    async fn revoke_token_accessor(&self, accessor: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(revoked) = state.tokens.get_mut(accessor) {
            *revoked = true;
        }

        Ok(())
    }

    async fn list_mounts(&self) -> Result<HashMap<String, MountInfo>> {
        Ok(self.state.lock().unwrap().mounts.clone())
    }

    async fn list_keys(&self, mount: &str, path: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let prefix = format!("{}/", path);
        let mut keys: Vec<String> = Vec::new();
        for (entry_mount, entry_path) in state.entries.keys() {
            if entry_mount != mount || !entry_path.starts_with(&prefix) {
                continue;
            }
            let rest = &entry_path[prefix.len()..];
            let key = match rest.split_once('/') {
                Some((dir, _)) => format!("{}/", dir),
                None => rest.to_string(),
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys.sort();

        Ok(keys)
    }

    async fn read_entry(&self, mount: &str, path: &str) -> Result<Option<VaultEntry>> {
        let state = self.state.lock().unwrap();
        let key = (mount.to_string(), path.to_string());
        if state.fail_reads.contains(&key) {
            return Err(Error::vault(
                format!("Failed to read '{}/{}'", mount, path),
                api_error(500, "injected read failure"),
            ));
        }

        Ok(state.entries.get(&key).cloned())
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    namespaces: Vec<String>,
    secrets: HashMap<(String, String), ClusterSecret>,
    fail_creates: HashSet<(String, String)>,
    fail_updates: HashSet<(String, String)>,
    create_log: Vec<(String, String)>,
    update_log: Vec<(String, String)>,
    revision: u64,
}

/// In-memory cluster standing in for the Kubernetes API
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new(namespaces: &[&str]) -> Self {
        Self {
            state: Mutex::new(ClusterState {
                namespaces: namespaces.iter().map(|ns| ns.to_string()).collect(),
                ..Default::default()
            }),
        }
    }

    /// Pre-seed a Secret, as if created outside the operator.
    pub fn insert_secret(&self, namespace: &str, secret: ClusterSecret) {
        let mut state = self.state.lock().unwrap();
        state.revision += 1;
        let mut secret = secret;
        secret.resource_version = Some(state.revision.to_string());
        state.secrets.insert((namespace.to_string(), secret.name.clone()), secret);
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<ClusterSecret> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn fail_updates_of(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_updates
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn fail_creates_of(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_creates
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().unwrap().create_log.len()
    }

    pub fn update_count(&self) -> usize {
        self.state.lock().unwrap().update_log.len()
    }

    pub fn updates_of(&self, namespace: &str, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .update_log
            .iter()
            .filter(|(ns, n)| ns == namespace && n == name)
            .count()
    }
}

fn kube_api_error(code: u16, message: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "TestInjected".to_string(),
        code,
    })
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().namespaces.clone())
    }

    async fn list_secret_names(&self, namespace: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .secrets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<ClusterSecret>> {
        Ok(self.get(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &ClusterSecret) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), secret.name.clone());
        if state.fail_creates.contains(&key) {
            return Err(Error::kubernetes(
                format!("Failed to create secret '{}' in '{}'", secret.name, namespace),
                kube_api_error(500, "injected create failure"),
            ));
        }
        if state.secrets.contains_key(&key) {
            return Err(Error::kubernetes(
                format!("Failed to create secret '{}' in '{}'", secret.name, namespace),
                kube_api_error(409, "secret already exists"),
            ));
        }

        state.revision += 1;
        let mut stored = secret.clone();
        stored.resource_version = Some(state.revision.to_string());
        state.create_log.push(key.clone());
        state.secrets.insert(key, stored);

        Ok(())
    }

    async fn update_secret(&self, namespace: &str, secret: &ClusterSecret) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = (namespace.to_string(), secret.name.clone());
        if state.fail_updates.contains(&key) {
            return Err(Error::kubernetes(
                format!("Failed to update secret '{}' in '{}'", secret.name, namespace),
                kube_api_error(500, "injected update failure"),
            ));
        }
        if !state.secrets.contains_key(&key) {
            return Err(Error::kubernetes(
                format!("Failed to update secret '{}' in '{}'", secret.name, namespace),
                kube_api_error(404, "secret not found"),
            ));
        }

        state.revision += 1;
        let mut stored = secret.clone();
        stored.resource_version = Some(state.revision.to_string());
        state.update_log.push(key.clone());
        state.secrets.insert(key, stored);

        Ok(())
    }
}
