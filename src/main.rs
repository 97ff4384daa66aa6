use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use vault_to_k8s::auth::CredentialManager;
use vault_to_k8s::bootstrap::{spawn_writer, BootstrapStore};
use vault_to_k8s::cluster::{ClusterOps, KubeHandle};
use vault_to_k8s::config::{AppConfig, AuthMethod};
use vault_to_k8s::observability::{init_logging, init_metrics};
use vault_to_k8s::sync::SyncEngine;
use vault_to_k8s::vault::{verify_vault_mount, VaultHandle, VaultOps};
use vault_to_k8s::{Result, VERSION};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Arc::new(AppConfig::from_env()?);
    init_logging(&config.observability)?;
    info!(version = VERSION, app_name = %config.app_name, "Starting operator");

    let metrics = init_metrics(&config.observability)?;

    let vault: Arc<dyn VaultOps> = Arc::new(VaultHandle::connect(&config.vault).await?);
    let cluster: Arc<dyn ClusterOps> = Arc::new(KubeHandle::connect().await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    match config.auth.method {
        AuthMethod::Token => {
            info!("Authentication by static token");
            vault.set_token(config.auth.token.as_deref().unwrap_or_default()).await;
        }
        AuthMethod::Approle => {
            let store = BootstrapStore::new(
                Arc::clone(&cluster),
                &config.pod_namespace,
                &config.app_name,
            );
            let writer = spawn_writer(store.clone());
            let manager = Arc::new(CredentialManager::new(
                Arc::clone(&vault),
                store,
                writer,
                Arc::clone(&config),
                metrics.clone(),
            ));
            manager.authenticate().await?;

            if config.auth.secret_id_rotation_interval != 0 {
                let manager = Arc::clone(&manager);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { manager.run_secret_id_rotation(shutdown).await });
            }
            if config.auth.token_rotation_interval != 0 {
                let manager = Arc::clone(&manager);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { manager.run_token_rotation(shutdown).await });
            }
        }
    }

    verify_vault_mount(vault.as_ref(), &config.vault).await?;

    info!(
        app_name = %config.app_name,
        sync_interval = config.sync.interval_secs,
        workers = config.sync.num_workers,
        "Started secret synchronization"
    );

    let engine = SyncEngine::new(vault, cluster, Arc::clone(&config), metrics);
    tokio::select! {
        _ = engine.run(shutdown_rx.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping");
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}
