//! Domain types for cluster Secret objects.
//!
//! The sync engine and workers operate on [`ClusterSecret`] values; the
//! kube API types stay at the client edge.

use std::collections::BTreeMap;

/// A cluster Secret as the operator sees it: a name, opaque byte payloads,
/// and annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSecret {
    pub name: String,
    pub data: BTreeMap<String, Vec<u8>>,
    pub annotations: BTreeMap<String, String>,
    /// Resource version of the live object, carried so updates replace the
    /// exact object that was read.
    pub resource_version: Option<String>,
}

impl ClusterSecret {
    /// Build a Secret payload with a single ownership annotation.
    pub fn with_annotation(
        name: impl Into<String>,
        data: BTreeMap<String, Vec<u8>>,
        annotation_name: &str,
        annotation_value: &str,
    ) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(annotation_name.to_string(), annotation_value.to_string());
        Self { name: name.into(), data, annotations, resource_version: None }
    }

    /// Classify who owns this Secret relative to the given source path.
    pub fn ownership(&self, annotation_name: &str, source_path: &str) -> Ownership<'_> {
        match self.annotations.get(annotation_name) {
            None => Ownership::Unannotated,
            Some(value) if value == source_path => Ownership::Ours,
            Some(value) => Ownership::Foreign { path: value },
        }
    }
}

/// Who owns a Secret, decided once per fetched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership<'a> {
    /// Annotated with the expected source path; the operator may mutate it
    Ours,
    /// Annotated, but the value points at a different source
    Foreign { path: &'a str },
    /// No ownership annotation at all; not managed by the operator
    Unannotated,
}

/// Whether `name` is a valid DNS-1123 subdomain, the grammar Kubernetes
/// requires for Secret names.
pub fn is_dns1123_subdomain(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(is_dns1123_label)
}

fn is_dns1123_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum(b) || b == b'-')
}
