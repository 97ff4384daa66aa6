//! Typed Kubernetes operations used by the operator.
//!
//! The [`ClusterOps`] trait is the seam between the sync engine and the
//! cluster API; [`KubeHandle`] is the production implementation over the
//! in-cluster `kube` client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, Client, ResourceExt};

use crate::cluster::secret::ClusterSecret;
use crate::errors::{Error, Result};

/// Typed cluster operations needed by the operator
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Names of all namespaces in the cluster
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Names of all Secrets in a namespace
    async fn list_secret_names(&self, namespace: &str) -> Result<Vec<String>>;

    /// Fetch a Secret; `None` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<ClusterSecret>>;

    /// Create a new Secret
    async fn create_secret(&self, namespace: &str, secret: &ClusterSecret) -> Result<()>;

    /// Replace an existing Secret
    async fn update_secret(&self, namespace: &str, secret: &ClusterSecret) -> Result<()>;
}

/// Production [`ClusterOps`] implementation backed by `kube`
pub struct KubeHandle {
    client: Client,
}

impl KubeHandle {
    /// Connect using the in-cluster (or kubeconfig) environment.
    pub async fn connect() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::kubernetes("Failed to create Kubernetes client", e))?;

        Ok(Self { client })
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterOps for KubeHandle {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::kubernetes("Failed to list namespaces", e))?;

        Ok(namespaces.items.into_iter().map(|ns| ns.name_any()).collect())
    }

    async fn list_secret_names(&self, namespace: &str) -> Result<Vec<String>> {
        let secrets = self
            .secrets(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| {
                Error::kubernetes(format!("Failed to list secrets in '{}'", namespace), e)
            })?;

        Ok(secrets.items.into_iter().map(|secret| secret.name_any()).collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<ClusterSecret>> {
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(from_kube_secret(secret))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::kubernetes(
                format!("Failed to get secret '{}' in '{}'", name, namespace),
                e,
            )),
        }
    }

    async fn create_secret(&self, namespace: &str, secret: &ClusterSecret) -> Result<()> {
        self.secrets(namespace)
            .create(&PostParams::default(), &to_kube_secret(namespace, secret))
            .await
            .map_err(|e| {
                Error::kubernetes(
                    format!("Failed to create secret '{}' in '{}'", secret.name, namespace),
                    e,
                )
            })?;

        Ok(())
    }

    async fn update_secret(&self, namespace: &str, secret: &ClusterSecret) -> Result<()> {
        self.secrets(namespace)
            .replace(&secret.name, &PostParams::default(), &to_kube_secret(namespace, secret))
            .await
            .map_err(|e| {
                Error::kubernetes(
                    format!("Failed to update secret '{}' in '{}'", secret.name, namespace),
                    e,
                )
            })?;

        Ok(())
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

fn from_kube_secret(secret: Secret) -> ClusterSecret {
    ClusterSecret {
        name: secret.name_any(),
        data: secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, ByteString(bytes))| (key, bytes))
            .collect(),
        annotations: secret.metadata.annotations.unwrap_or_default(),
        resource_version: secret.metadata.resource_version,
    }
}

fn to_kube_secret(namespace: &str, secret: &ClusterSecret) -> Secret {
    let data: BTreeMap<String, ByteString> = secret
        .data
        .iter()
        .map(|(key, bytes)| (key.clone(), ByteString(bytes.clone())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(secret.name.clone()),
            namespace: Some(namespace.to_string()),
            annotations: Some(secret.annotations.clone()),
            resource_version: secret.resource_version.clone(),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}
