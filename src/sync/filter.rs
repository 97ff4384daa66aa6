//! Entry filtering and versioning policy.
//!
//! Vault entry names may carry a `.<clusterName>` suffix to target a single
//! cluster. The filter drops names addressed to other clusters and names
//! with more than one dot, and decides whether an entry materializes only
//! as an immutable versioned Secret or additionally as a mutable
//! suffix-stripped copy.

use std::collections::HashMap;

/// How a filtered entry materializes in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// Only the immutable `<name>-v<version>` Secret
    Versioned,
    /// The versioned Secret plus a mutable suffix-stripped copy, for
    /// non-versioning namespaces
    VersionedAndMutable,
}

/// Filter raw entry names for one namespace.
///
/// A name containing a dot survives only when it ends with
/// `cluster_suffix` and contains exactly one dot. Survivors in a
/// non-versioning namespace that carry the suffix get
/// [`EntryMode::VersionedAndMutable`]; every other survivor is
/// [`EntryMode::Versioned`]. A name is never recorded twice.
pub fn filter_entries(
    entries: &[String],
    cluster_suffix: &str,
    non_versioning: bool,
) -> HashMap<String, EntryMode> {
    let mut filtered = HashMap::new();

    for name in entries {
        if name.contains('.')
            && (!name.ends_with(cluster_suffix) || name.matches('.').count() > 1)
        {
            continue;
        }

        let mode = if non_versioning && name.ends_with(cluster_suffix) {
            EntryMode::VersionedAndMutable
        } else {
            EntryMode::Versioned
        };
        filtered.insert(name.clone(), mode);
    }

    filtered
}
