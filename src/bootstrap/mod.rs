//! The operator's self-owned bootstrap Secret.
//!
//! A single Secret named `<appName>-system` in the operator's own namespace
//! persists the current token accessor and AppRole SecretID across
//! restarts. The operator must never overwrite a Secret it did not create:
//! updates are refused unless the existing object carries
//! `createdBy = <appName>`.
//!
//! All writes are funneled through a single writer task; `authenticate` and
//! the two rotation loops hold cloneable [`BootstrapWriter`] handles and
//! send upsert commands instead of racing on the Secret themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::cluster::{ClusterOps, ClusterSecret};
use crate::errors::{Error, Result};

/// Data key holding the Vault token accessor
pub const TOKEN_ACCESSOR_KEY: &str = "token-accessor";

/// Data key holding the AppRole SecretID
pub const SECRET_ID_KEY: &str = "approle_secret-id";

/// Annotation marking the bootstrap Secret as operator-created
pub const CREATED_BY_ANNOTATION: &str = "createdBy";

/// Persisted credential state
#[derive(Debug, Clone, Default)]
pub struct BootstrapRecord {
    pub token_accessor: String,
    pub secret_id: String,
}

/// Reads and writes the bootstrap Secret
#[derive(Clone)]
pub struct BootstrapStore {
    cluster: Arc<dyn ClusterOps>,
    namespace: String,
    app_name: String,
}

impl BootstrapStore {
    pub fn new(cluster: Arc<dyn ClusterOps>, namespace: &str, app_name: &str) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            app_name: app_name.to_string(),
        }
    }

    /// Name of the bootstrap Secret, `<appName>-system`
    pub fn secret_name(&self) -> String {
        format!("{}-system", self.app_name)
    }

    /// Read the persisted record; `None` when the Secret does not exist.
    pub async fn load(&self) -> Result<Option<BootstrapRecord>> {
        let secret = self.cluster.get_secret(&self.namespace, &self.secret_name()).await?;

        Ok(secret.map(|secret| record_from(&secret)))
    }

    /// Create or replace the bootstrap Secret.
    ///
    /// Refuses to update a Secret that lacks the `createdBy` annotation or
    /// was created by another application; losing that guard would let two
    /// operator instances clobber each other's accessors.
    pub async fn upsert(&self, token_accessor: &str, secret_id: &str) -> Result<()> {
        let name = self.secret_name();
        let mut data = BTreeMap::new();
        data.insert(TOKEN_ACCESSOR_KEY.to_string(), token_accessor.as_bytes().to_vec());
        data.insert(SECRET_ID_KEY.to_string(), secret_id.as_bytes().to_vec());

        let mut secret =
            ClusterSecret::with_annotation(name.as_str(), data, CREATED_BY_ANNOTATION, &self.app_name);

        match self.cluster.get_secret(&self.namespace, &name).await? {
            None => {
                tracing::info!(
                    secret = %name,
                    namespace = %self.namespace,
                    "Creating application bootstrap secret"
                );
                self.cluster.create_secret(&self.namespace, &secret).await
            }
            Some(existing) => {
                match existing.annotations.get(CREATED_BY_ANNOTATION) {
                    None => {
                        return Err(Error::ownership(
                            &name,
                            &self.namespace,
                            format!(
                                "cannot update bootstrap secret as it was not created by '{}'",
                                self.app_name
                            ),
                        ))
                    }
                    Some(created_by) if created_by != &self.app_name => {
                        return Err(Error::ownership(
                            &name,
                            &self.namespace,
                            "secret already exists but it wasn't created by this application",
                        ))
                    }
                    Some(_) => {}
                }

                tracing::debug!(
                    secret = %name,
                    namespace = %self.namespace,
                    "Updating application bootstrap secret"
                );
                secret.resource_version = existing.resource_version;
                self.cluster.update_secret(&self.namespace, &secret).await
            }
        }
    }
}

fn record_from(secret: &ClusterSecret) -> BootstrapRecord {
    let field = |key: &str| {
        secret
            .data
            .get(key)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    };

    BootstrapRecord {
        token_accessor: field(TOKEN_ACCESSOR_KEY),
        secret_id: field(SECRET_ID_KEY),
    }
}

enum Command {
    Upsert {
        token_accessor: String,
        secret_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle to the bootstrap writer task
#[derive(Clone)]
pub struct BootstrapWriter {
    tx: mpsc::Sender<Command>,
}

impl BootstrapWriter {
    /// Persist `(token_accessor, secret_id)` through the writer task.
    pub async fn upsert(&self, token_accessor: &str, secret_id: &str) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Upsert {
                token_accessor: token_accessor.to_string(),
                secret_id: secret_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::auth("Bootstrap secret writer task stopped"))?;

        response.await.map_err(|_| Error::auth("Bootstrap secret writer task stopped"))?
    }
}

/// Spawn the task owning all bootstrap Secret writes.
pub fn spawn_writer(store: BootstrapStore) -> BootstrapWriter {
    let (tx, mut rx) = mpsc::channel::<Command>(8);

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Upsert { token_accessor, secret_id, reply } => {
                    let result = store.upsert(&token_accessor, &secret_id).await;
                    // Caller may have given up waiting; nothing to do then.
                    let _ = reply.send(result);
                }
            }
        }
    });

    BootstrapWriter { tx }
}
