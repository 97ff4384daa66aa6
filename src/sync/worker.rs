//! Per-entry synchronization worker.
//!
//! A worker reads one Vault entry, derives its candidate Secret names, and
//! creates or updates the matching cluster Secrets. Errors split two ways:
//! a failed Vault read or Secret update is fatal to the whole namespace
//! (returned as `Err`), while malformed entries, foreign ownership, and
//! failed creates or gets only increment `skipped`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::cluster::{is_dns1123_subdomain, ClusterOps, ClusterSecret, Ownership};
use crate::errors::Result;
use crate::sync::filter::EntryMode;
use crate::vault::VaultOps;

/// One entry dispatched to the worker pool
#[derive(Debug, Clone)]
pub struct EntryJob {
    pub name: String,
    pub mode: EntryMode,
}

/// Per-namespace reconciliation counters.
///
/// `synced` means "successfully reconciled": created, updated, already
/// up-to-date, or an already-existing versioned Secret. Skips and errors
/// never count as synced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounters {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub synced: u64,
}

impl SyncCounters {
    pub fn merge(&mut self, other: SyncCounters) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.synced += other.synced;
    }
}

/// Shared, read-only context for all workers of one namespace fan-out
pub struct WorkerContext {
    pub vault: Arc<dyn VaultOps>,
    pub cluster: Arc<dyn ClusterOps>,
    /// KV mount name
    pub mount: String,
    /// Subpath under the mount holding the per-namespace directories
    pub secrets_root: String,
    pub namespace: String,
    /// `.<clusterName>`
    pub cluster_suffix: String,
    pub annotation_name: String,
    /// Secret names already present in the namespace when the tick started
    pub existing_secrets: HashSet<String>,
}

impl WorkerContext {
    /// Full source path recorded in the ownership annotation,
    /// `<mount>/<secretsRoot>/<namespace>/<name>`
    fn full_vault_path(&self, name: &str) -> String {
        format!("{}/{}/{}/{}", self.mount, self.secrets_root, self.namespace, name)
    }

    /// Path of the entry relative to the mount
    fn entry_path(&self, name: &str) -> String {
        format!("{}/{}/{}", self.secrets_root, self.namespace, name)
    }
}

/// Candidate Secret names for a filtered entry. The boolean marks the
/// immutable versioned candidate.
fn candidate_names(
    name: &str,
    mode: EntryMode,
    version: u64,
    cluster_suffix: &str,
) -> Vec<(String, bool)> {
    let mut candidates = vec![(format!("{}-v{}", name, version), true)];
    if mode == EntryMode::VersionedAndMutable {
        let stripped = name.strip_suffix(cluster_suffix).unwrap_or(name);
        candidates.push((stripped.to_string(), false));
    }

    candidates
}

/// Process one entry job. `Err` aborts the namespace.
pub async fn process_entry(ctx: &WorkerContext, job: &EntryJob) -> Result<SyncCounters> {
    let mut counters = SyncCounters::default();
    let full_path = ctx.full_vault_path(&job.name);

    debug!(path = %full_path, "Reading entry from Vault");
    let entry = ctx.vault.read_entry(&ctx.mount, &ctx.entry_path(&job.name)).await?;

    let entry = match entry {
        Some(entry) if !entry.data.is_empty() => entry,
        _ => {
            debug!(path = %full_path, "Didn't get any data for entry, skipped");
            counters.skipped += 1;
            return Ok(counters);
        }
    };

    // Secret payloads must be strings; anything else marks the whole entry
    // malformed.
    let mut data = BTreeMap::new();
    for (key, value) in &entry.data {
        match value.as_str() {
            Some(text) => {
                data.insert(key.clone(), text.as_bytes().to_vec());
            }
            None => {
                debug!(path = %full_path, key = %key, "Incorrect data in entry, skipped");
                counters.skipped += 1;
                return Ok(counters);
            }
        }
    }

    let candidates = candidate_names(&job.name, job.mode, entry.version, &ctx.cluster_suffix);
    debug!(namespace = %ctx.namespace, ?candidates, "Candidate secrets to check");

    for (candidate, versioned) in candidates {
        if versioned && ctx.existing_secrets.contains(&candidate) {
            debug!(
                secret = %candidate,
                namespace = %ctx.namespace,
                "Ignoring secret as it already exists"
            );
            counters.synced += 1;
            continue;
        }

        if !is_dns1123_subdomain(&candidate) {
            warn!(
                secret = %candidate,
                namespace = %ctx.namespace,
                "Secret name is not a valid DNS-1123 subdomain, skipped"
            );
            counters.skipped += 1;
            continue;
        }

        let desired = ClusterSecret::with_annotation(
            candidate.as_str(),
            data.clone(),
            &ctx.annotation_name,
            &full_path,
        );

        let existing = match ctx.cluster.get_secret(&ctx.namespace, &candidate).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(error = %e, secret = %candidate, "Error during get of secret");
                counters.skipped += 1;
                continue;
            }
        };

        match existing {
            None => {
                debug!(
                    secret = %candidate,
                    namespace = %ctx.namespace,
                    source = %full_path,
                    "Creating secret"
                );
                match ctx.cluster.create_secret(&ctx.namespace, &desired).await {
                    Ok(()) => {
                        counters.created += 1;
                        counters.synced += 1;
                    }
                    Err(e) => {
                        error!(error = %e, secret = %candidate, "Error during create of secret");
                        counters.skipped += 1;
                    }
                }
            }
            Some(existing) => {
                if existing.data == desired.data {
                    debug!(
                        secret = %candidate,
                        namespace = %ctx.namespace,
                        "Ignoring update of secret as it is already up-to-date"
                    );
                    counters.synced += 1;
                    continue;
                }

                match existing.ownership(&ctx.annotation_name, &full_path) {
                    Ownership::Unannotated => {
                        warn!(
                            secret = %candidate,
                            namespace = %ctx.namespace,
                            "Ignoring secret as it is not managed by this application"
                        );
                        counters.skipped += 1;
                    }
                    Ownership::Foreign { path } => {
                        warn!(
                            secret = %candidate,
                            namespace = %ctx.namespace,
                            annotated_source = %path,
                            "Ignoring secret as its annotation points at a different path"
                        );
                        counters.skipped += 1;
                    }
                    Ownership::Ours => {
                        debug!(
                            secret = %candidate,
                            namespace = %ctx.namespace,
                            source = %full_path,
                            "Updating secret"
                        );
                        let mut desired = desired;
                        desired.resource_version = existing.resource_version.clone();
                        ctx.cluster.update_secret(&ctx.namespace, &desired).await?;
                        counters.updated += 1;
                        counters.synced += 1;
                    }
                }
            }
        }
    }

    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_merge() {
        let mut total = SyncCounters::default();
        total.merge(SyncCounters { created: 1, updated: 0, skipped: 2, synced: 1 });
        total.merge(SyncCounters { created: 0, updated: 3, skipped: 0, synced: 3 });
        assert_eq!(total, SyncCounters { created: 1, updated: 3, skipped: 2, synced: 4 });
    }

    #[test]
    fn test_versioned_candidate_only() {
        let candidates = candidate_names("secret1", EntryMode::Versioned, 2, ".k8s-cluster");
        assert_eq!(candidates, vec![("secret1-v2".to_string(), true)]);
    }

    #[test]
    fn test_mutable_candidate_strips_suffix() {
        let candidates = candidate_names(
            "secret2.k8s-cluster",
            EntryMode::VersionedAndMutable,
            1,
            ".k8s-cluster",
        );
        assert_eq!(
            candidates,
            vec![
                ("secret2.k8s-cluster-v1".to_string(), true),
                ("secret2".to_string(), false),
            ]
        );
    }
}
