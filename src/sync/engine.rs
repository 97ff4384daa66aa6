//! Periodic synchronization pipeline.
//!
//! Every tick the engine intersects the namespaces present under the Vault
//! secrets path with the namespaces of the cluster, then reconciles each
//! common namespace through a bounded worker pool. Namespaces run in
//! sequence; entries within a namespace run concurrently.
//!
//! A fatal worker result (Vault read or Secret update failure) cancels the
//! producer, drains the in-flight workers, and fails only the current
//! namespace; the next namespace proceeds independently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterOps;
use crate::config::AppConfig;
use crate::errors::{Error, Result};
use crate::observability::MetricsRecorder;
use crate::sync::filter::{filter_entries, EntryMode};
use crate::sync::worker::{process_entry, EntryJob, SyncCounters, WorkerContext};
use crate::vault::VaultOps;

/// Result of reconciling one namespace: the aggregated counters, plus the
/// fatal error when the namespace was aborted mid-way.
#[derive(Debug, Default)]
pub struct NamespaceOutcome {
    pub counters: SyncCounters,
    pub error: Option<Error>,
}

/// Drives the periodic Vault-to-cluster synchronization
pub struct SyncEngine {
    vault: Arc<dyn VaultOps>,
    cluster: Arc<dyn ClusterOps>,
    config: Arc<AppConfig>,
    metrics: MetricsRecorder,
    ticks: AtomicU64,
}

impl SyncEngine {
    pub fn new(
        vault: Arc<dyn VaultOps>,
        cluster: Arc<dyn ClusterOps>,
        config: Arc<AppConfig>,
        metrics: MetricsRecorder,
    ) -> Self {
        Self { vault, cluster, config, metrics, ticks: AtomicU64::new(0) }
    }

    /// Run sync ticks forever, every `SYNC_INTERVAL` seconds, until
    /// shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sync.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick completes immediately; syncing starts one
        // full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_tick().await,
                _ = shutdown.changed() => {
                    info!("Sync loop stopped");
                    return;
                }
            }
        }
    }

    /// Execute a single sync tick.
    pub async fn run_tick(&self) {
        let start = Instant::now();
        debug!("Started sync secrets from Vault to k8s");

        let vault_namespaces = match self.vault_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                error!(error = %e, "Failed to list Vault namespaces");
                self.metrics.record_sync_aborted();
                return;
            }
        };
        if vault_namespaces.is_empty() {
            warn!(
                path = %self.config.vault.secrets_path,
                "Didn't find any namespaces under the secrets path"
            );
            self.metrics.record_sync_aborted();
            return;
        }
        debug!(?vault_namespaces, "Namespaces in Vault");

        let cluster_namespaces = match self.cluster.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                error!(error = %e, "Failed to list cluster namespaces");
                self.metrics.record_sync_aborted();
                return;
            }
        };
        debug!(?cluster_namespaces, "Namespaces in k8s");

        let namespaces_for_sync =
            self.namespaces_for_sync(&vault_namespaces, &cluster_namespaces);
        if namespaces_for_sync.is_empty() {
            warn!("There are no Vault namespaces that exist on the current cluster");
            self.metrics.record_sync_aborted();
            return;
        }
        debug!(?namespaces_for_sync, "Namespaces for sync");

        for namespace in &namespaces_for_sync {
            self.sync_namespace(namespace).await;
        }

        let elapsed = start.elapsed().as_secs_f64();
        let total_syncs = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.record_sync_tick(elapsed);
        debug!(seconds = elapsed, total_syncs, "Finished sync");
    }

    /// Vault namespaces to sync: the intersection with the cluster's
    /// namespaces. Vault-only namespaces are reported with sync status 0.
    fn namespaces_for_sync(
        &self,
        vault_namespaces: &[String],
        cluster_namespaces: &[String],
    ) -> Vec<String> {
        let cluster: HashSet<&String> = cluster_namespaces.iter().collect();

        vault_namespaces
            .iter()
            .filter(|namespace| {
                if cluster.contains(namespace) {
                    true
                } else {
                    self.metrics.set_sync_status(namespace, false);
                    false
                }
            })
            .cloned()
            .collect()
    }

    /// Directories directly under the secrets path
    async fn vault_namespaces(&self) -> Result<Vec<String>> {
        let keys = self
            .vault
            .list_keys(self.config.vault.mount(), self.config.vault.secrets_root())
            .await?;

        Ok(keys
            .iter()
            .filter(|key| key.ends_with('/'))
            .map(|key| key.trim_end_matches('/').to_string())
            .collect())
    }

    /// Entry names (non-directories) under one namespace directory
    async fn vault_entries(&self, namespace: &str) -> Result<Vec<String>> {
        let path = format!("{}/{}", self.config.vault.secrets_root(), namespace);
        let keys = self.vault.list_keys(self.config.vault.mount(), &path).await?;

        Ok(keys.into_iter().filter(|key| !key.ends_with('/')).collect())
    }

    async fn sync_namespace(&self, namespace: &str) {
        let entries = match self.vault_entries(namespace).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, namespace, "Failed to list Vault entries");
                self.metrics.set_sync_status(namespace, false);
                return;
            }
        };
        debug!(namespace, ?entries, "Entries in Vault");

        let non_versioning =
            self.config.sync.non_versioning_namespaces.iter().any(|ns| ns == namespace);
        let filtered =
            filter_entries(&entries, &self.config.sync.cluster_suffix(), non_versioning);
        debug!(namespace, ?filtered, "Filtered entries");

        let existing = match self.cluster.list_secret_names(namespace).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, namespace, "Failed to list cluster secrets");
                self.metrics.set_sync_status(namespace, false);
                return;
            }
        };

        let outcome = self.run_namespace(namespace, filtered, existing).await;
        let counters = outcome.counters;
        debug!(
            namespace,
            created = counters.created,
            updated = counters.updated,
            skipped = counters.skipped,
            synced = counters.synced,
            "Namespace sync finished"
        );
        self.metrics.record_namespace_outcome(
            namespace,
            counters.created,
            counters.updated,
            counters.skipped,
            counters.synced,
        );
        match outcome.error {
            None => self.metrics.set_sync_status(namespace, true),
            Some(e) => {
                error!(error = %e, namespace, "Namespace sync aborted");
                self.metrics.set_sync_status(namespace, false);
            }
        }
    }

    /// Fan the filtered entries of one namespace out over the worker pool
    /// and aggregate the per-entry results.
    pub async fn run_namespace(
        &self,
        namespace: &str,
        filtered: HashMap<String, EntryMode>,
        existing: Vec<String>,
    ) -> NamespaceOutcome {
        let total = filtered.len();
        let mut outcome = NamespaceOutcome::default();
        if total == 0 {
            return outcome;
        }

        let num_workers = self.config.sync.num_workers;
        let (job_tx, job_rx) = mpsc::channel::<EntryJob>(num_workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        // Results are unbounded so draining workers never block on a
        // receiver that has already seen a fatal result.
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Result<SyncCounters>>();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let ctx = Arc::new(WorkerContext {
            vault: Arc::clone(&self.vault),
            cluster: Arc::clone(&self.cluster),
            mount: self.config.vault.mount().to_string(),
            secrets_root: self.config.vault.secrets_root().to_string(),
            namespace: namespace.to_string(),
            cluster_suffix: self.config.sync.cluster_suffix(),
            annotation_name: self.config.sync.annotation_name.clone(),
            existing_secrets: existing.into_iter().collect(),
        });

        let mut workers = JoinSet::new();
        for worker_id in 1..=num_workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let ctx = Arc::clone(&ctx);
            let mut cancel = cancel_rx.clone();
            workers.spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        tokio::select! {
                            job = rx.recv() => job,
                            _ = cancel.changed() => None,
                        }
                    };
                    let Some(job) = job else { break };
                    debug!(worker = worker_id, entry = %job.name, "Processing entry");
                    let result = process_entry(&ctx, &job).await;
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        // Feed jobs from a separate task so a fatal result can stop the
        // dispatch without abandoning the channel mid-send.
        let jobs: Vec<EntryJob> =
            filtered.into_iter().map(|(name, mode)| EntryJob { name, mode }).collect();
        let mut producer_cancel = cancel_rx.clone();
        let producer = tokio::spawn(async move {
            for job in jobs {
                tokio::select! {
                    sent = job_tx.send(job) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = producer_cancel.changed() => break,
                }
            }
        });

        let mut received = 0;
        while received < total {
            match result_rx.recv().await {
                Some(Ok(counters)) => {
                    received += 1;
                    outcome.counters.merge(counters);
                }
                Some(Err(e)) => {
                    received += 1;
                    outcome.error = Some(e);
                    let _ = cancel_tx.send(true);
                    break;
                }
                // All workers stopped without delivering every result.
                None => break,
            }
        }

        let _ = producer.await;
        while workers.join_next().await.is_some() {}

        outcome
    }
}
