//! # Metrics Collection
//!
//! Prometheus metrics for the operator, all under the `vtk` namespace.
//!
//! Gauge/counter names and their labels are a stable contract consumed by
//! dashboards and alerts; renaming them is a breaking change.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};

const SYNC_TIME: &str = "vtk_sync_time";
const SYNC_COUNT: &str = "vtk_sync_count";
const SYNC_STATUS: &str = "vtk_sync_status";
const SECRETS_CREATED: &str = "vtk_secrets_created";
const SECRETS_UPDATED: &str = "vtk_secrets_updated";
const SECRETS_SKIPPED: &str = "vtk_secrets_skipped";
const SECRETS_SYNCED: &str = "vtk_secrets_synced";
const AUTH_APPROLE_SECRET_ID: &str = "vtk_auth_approle_secret_id";
const AUTH_TOKEN: &str = "vtk_auth_token";

/// `type` label values on the rotation gauges
const TYPE_ROTATION_STATUS: &str = "rotation-status";
const TYPE_NEXT_ROTATION: &str = "next-rotation-timestamp";
const TYPE_LAST_ROTATION_STATUS: &str = "last-rotation-status";
const TYPE_ERROR_REVOKE_SECRET_ID: &str = "error-revoke-secret-id";
const TYPE_ERROR_REVOKE_TOKEN: &str = "error-revoke-token";
const TYPE_ERROR_SAVE_ACCESSOR: &str = "error-save-token-accessor-in-k8s-secret";

/// Records operator metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record a finished sync tick
    pub fn record_sync_tick(&self, duration_secs: f64) {
        gauge!(SYNC_TIME).set(duration_secs);
        counter!(SYNC_COUNT).increment(1);
        self.set_sync_status("-", true);
    }

    /// Record a tick that aborted before reconciling any namespace
    pub fn record_sync_aborted(&self) {
        gauge!(SYNC_TIME).set(0.0);
        self.set_sync_status("-", false);
    }

    /// Set the per-namespace sync status; the `-` namespace carries the
    /// whole-tick outcome
    pub fn set_sync_status(&self, namespace: &str, ok: bool) {
        gauge!(SYNC_STATUS, "namespace" => namespace.to_string()).set(bool_gauge(ok));
    }

    /// Record the per-namespace counters of a sync cycle
    pub fn record_namespace_outcome(
        &self,
        namespace: &str,
        created: u64,
        updated: u64,
        skipped: u64,
        synced: u64,
    ) {
        let labels = [("namespace", namespace.to_string())];
        gauge!(SECRETS_CREATED, &labels).set(created as f64);
        gauge!(SECRETS_UPDATED, &labels).set(updated as f64);
        gauge!(SECRETS_SKIPPED, &labels).set(skipped as f64);
        gauge!(SECRETS_SYNCED, &labels).set(synced as f64);
    }

    /// Unix timestamp of the next planned token rotation
    pub fn set_token_next_rotation(&self, timestamp: i64) {
        gauge!(AUTH_TOKEN, "type" => TYPE_NEXT_ROTATION).set(timestamp as f64);
    }

    /// Outcome of the most recent token rotation attempt
    pub fn set_token_last_rotation_status(&self, ok: bool) {
        gauge!(AUTH_TOKEN, "type" => TYPE_LAST_ROTATION_STATUS).set(bool_gauge(ok));
    }

    /// Whether revoking the predecessor token failed
    pub fn set_token_revoke_error(&self, failed: bool) {
        gauge!(AUTH_TOKEN, "type" => TYPE_ERROR_REVOKE_TOKEN).set(bool_gauge(failed));
    }

    /// Whether persisting the token accessor to the bootstrap Secret failed
    pub fn set_token_persist_error(&self, failed: bool) {
        gauge!(AUTH_TOKEN, "type" => TYPE_ERROR_SAVE_ACCESSOR).set(bool_gauge(failed));
    }

    /// Whether SecretID rotation is armed (lookup succeeded)
    pub fn set_secret_id_rotation_status(&self, ok: bool) {
        gauge!(AUTH_APPROLE_SECRET_ID, "type" => TYPE_ROTATION_STATUS).set(bool_gauge(ok));
    }

    /// Unix timestamp of the next planned SecretID rotation
    pub fn set_secret_id_next_rotation(&self, timestamp: i64) {
        gauge!(AUTH_APPROLE_SECRET_ID, "type" => TYPE_NEXT_ROTATION).set(timestamp as f64);
    }

    /// Outcome of the most recent SecretID rotation attempt
    pub fn set_secret_id_last_rotation_status(&self, ok: bool) {
        gauge!(AUTH_APPROLE_SECRET_ID, "type" => TYPE_LAST_ROTATION_STATUS).set(bool_gauge(ok));
    }

    /// Whether revoking the predecessor SecretID failed
    pub fn set_secret_id_revoke_error(&self, failed: bool) {
        gauge!(AUTH_APPROLE_SECRET_ID, "type" => TYPE_ERROR_REVOKE_SECRET_ID)
            .set(bool_gauge(failed));
    }

    /// Register baseline metrics so the exporter shows them before the
    /// first events occur.
    pub fn register(&self) {
        describe_gauge!(SYNC_TIME, Unit::Seconds, "How long the sync run took");
        describe_counter!(
            SYNC_COUNT,
            Unit::Count,
            "How many times sync was running since application start"
        );
        describe_gauge!(SYNC_STATUS, "Status of sync");
        describe_gauge!(
            SECRETS_CREATED,
            Unit::Count,
            "How many secrets were created in k8s during sync cycle"
        );
        describe_gauge!(
            SECRETS_UPDATED,
            Unit::Count,
            "How many secrets were updated in k8s during sync cycle"
        );
        describe_gauge!(
            SECRETS_SKIPPED,
            Unit::Count,
            "How many secrets were skipped during sync cycle"
        );
        describe_gauge!(
            SECRETS_SYNCED,
            Unit::Count,
            "How many secrets were synced during sync cycle"
        );
        describe_gauge!(AUTH_APPROLE_SECRET_ID, "AppRole Secret ID rotation info");
        describe_gauge!(AUTH_TOKEN, "Token rotation info");

        gauge!(SYNC_TIME).set(0.0);
        counter!(SYNC_COUNT).absolute(0);
    }
}

fn bool_gauge(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Initialize the Prometheus exporter and register the metric set.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<MetricsRecorder> {
    let recorder = MetricsRecorder::new();

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => return Ok(recorder),
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics listen address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    recorder.register();

    info!(
        listen_address = %metrics_addr,
        metrics_path = %config.metrics_path,
        "Prometheus exporter enabled"
    );

    Ok(recorder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_without_exporter_is_a_noop() {
        // With no recorder installed these must not panic.
        let recorder = MetricsRecorder::new();
        recorder.record_sync_tick(1.25);
        recorder.record_sync_aborted();
        recorder.set_sync_status("k8s-ns1", true);
        recorder.set_sync_status("-", false);
        recorder.record_namespace_outcome("k8s-ns1", 1, 2, 3, 4);
        recorder.set_token_next_rotation(1_700_000_000);
        recorder.set_token_last_rotation_status(true);
        recorder.set_token_revoke_error(false);
        recorder.set_token_persist_error(false);
        recorder.set_secret_id_rotation_status(true);
        recorder.set_secret_id_next_rotation(1_700_000_000);
        recorder.set_secret_id_last_rotation_status(false);
        recorder.set_secret_id_revoke_error(true);
    }

    #[test]
    fn test_init_metrics_disabled() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_init_metrics_bad_address() {
        let config = ObservabilityConfig {
            listen_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(init_metrics(&config).is_err());
    }
}
