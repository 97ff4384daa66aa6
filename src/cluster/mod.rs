//! Kubernetes integration: typed client operations and Secret domain types.

pub mod client;
pub mod secret;

pub use client::{ClusterOps, KubeHandle};
pub use secret::{is_dns1123_subdomain, ClusterSecret, Ownership};
