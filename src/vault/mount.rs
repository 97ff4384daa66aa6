//! Validation of the configured secrets mount.
//!
//! The secrets path must live on a KV mount with versioning enabled
//! (`options.version == "2"`); everything else the operator relies on
//! (`metadata`/`data` path split, entry versions) assumes it.

use std::collections::HashMap;

use crate::config::VaultConfig;
use crate::errors::{Error, Result};
use crate::vault::client::{MountInfo, VaultOps};

/// Check that the mount component of `secrets_path` exists and is a KV v2
/// engine.
pub fn verify_mount(mounts: &HashMap<String, MountInfo>, secrets_path: &str) -> Result<()> {
    let mount = format!("{}/", secrets_path.split('/').next().unwrap_or_default());
    let mut matched = false;

    for (key, info) in mounts {
        if !mount.starts_with(key.as_str()) {
            continue;
        }

        if info.kind != "kv" {
            return Err(Error::mount(format!(
                "Matching mount '{}' for path '{}' is not of type kv",
                key, mount
            )));
        }

        if info.options.get("version").map(String::as_str) != Some("2") {
            return Err(Error::mount(format!(
                "Vault mount '{}' and defined path '{}' matched but Vault mount version is not '2'",
                key, mount
            )));
        }
        matched = true;
    }

    if !matched {
        return Err(Error::mount(format!("Mount path '{}' doesn't exist in Vault", mount)));
    }

    Ok(())
}

/// Fetch the mounts list and run [`verify_mount`] against the configured
/// secrets path.
pub async fn verify_vault_mount(vault: &dyn VaultOps, config: &VaultConfig) -> Result<()> {
    let mounts = vault.list_mounts().await?;
    verify_mount(&mounts, &config.secrets_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv_mount(version: &str) -> MountInfo {
        let mut options = HashMap::new();
        options.insert("version".to_string(), version.to_string());
        MountInfo { kind: "kv".to_string(), options }
    }

    fn mounts_with(path: &str, info: MountInfo) -> HashMap<String, MountInfo> {
        let mut mounts = HashMap::new();
        mounts.insert(path.to_string(), info);
        mounts.insert(
            "sys/".to_string(),
            MountInfo { kind: "system".to_string(), options: HashMap::new() },
        );
        mounts
    }

    #[test]
    fn test_kv2_mount_passes() {
        let mounts = mounts_with("k8s/", kv_mount("2"));
        assert!(verify_mount(&mounts, "k8s/dev").is_ok());
    }

    #[test]
    fn test_missing_mount() {
        let mounts = mounts_with("other/", kv_mount("2"));
        let err = verify_mount(&mounts, "k8s/dev").unwrap_err();
        assert!(err.to_string().contains("doesn't exist in Vault"));
    }

    #[test]
    fn test_wrong_engine_type() {
        let mounts =
            mounts_with("k8s/", MountInfo { kind: "generic".to_string(), options: HashMap::new() });
        let err = verify_mount(&mounts, "k8s/dev").unwrap_err();
        assert!(err.to_string().contains("is not of type kv"));
    }

    #[test]
    fn test_wrong_kv_version() {
        let mounts = mounts_with("k8s/", kv_mount("1"));
        let err = verify_mount(&mounts, "k8s/dev").unwrap_err();
        assert!(err.to_string().contains("version is not '2'"));

        let unversioned =
            mounts_with("k8s/", MountInfo { kind: "kv".to_string(), options: HashMap::new() });
        assert!(verify_mount(&unversioned, "k8s/dev").is_err());
    }
}
