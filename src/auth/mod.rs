//! Vault credential lifecycle: authentication, rotation, revocation.
//!
//! On startup [`CredentialManager::authenticate`] turns the single-use
//! wrapped token (or the SecretID persisted in the bootstrap Secret) into a
//! client token, then two long-lived tasks keep the token and the SecretID
//! fresh, revoking each predecessor once its successor is in force.
//!
//! Revocation of a predecessor is always best-effort: the new credential is
//! already active and the old one expires by TTL, so failures are demoted
//! to warnings and surfaced through the `error-revoke-*` gauges.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::bootstrap::{BootstrapStore, BootstrapWriter};
use crate::config::AppConfig;
use crate::errors::{Error, Result};
use crate::observability::MetricsRecorder;
use crate::vault::VaultOps;

/// Fixed wait between retries of a failed rotation step
const ROTATION_RETRY_SECS: u64 = 60;

/// Initial (and floor) backoff for the SecretID lookup
const LOOKUP_RETRY_BASE_SECS: u64 = 60;

/// Process-local authentication state
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub token_accessor: String,
    /// Token TTL in seconds, from the login lease duration
    pub token_ttl: u64,
    /// Unix timestamp of the last successful login
    pub token_created_at: i64,
    pub secret_id: String,
    /// AppRole role name reported by the login metadata
    pub role_name: String,
}

/// Normalize a configured rotation interval against a credential TTL.
///
/// `-1` (and any other negative value) derives 70% of the TTL; a value at
/// or above the TTL is treated as unset and also derived. The result is
/// always strictly below the TTL for any TTL > 1.
pub fn normalize_rotation_interval(configured: i64, ttl: u64) -> u64 {
    if configured < 0 || configured as u64 >= ttl {
        (ttl as f64 * 0.7) as u64
    } else {
        configured as u64
    }
}

/// Owns the Vault credentials for the process lifetime
pub struct CredentialManager {
    vault: Arc<dyn VaultOps>,
    store: BootstrapStore,
    writer: BootstrapWriter,
    config: Arc<AppConfig>,
    metrics: MetricsRecorder,
    state: RwLock<AuthState>,
}

impl CredentialManager {
    pub fn new(
        vault: Arc<dyn VaultOps>,
        store: BootstrapStore,
        writer: BootstrapWriter,
        config: Arc<AppConfig>,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            vault,
            store,
            writer,
            config,
            metrics,
            state: RwLock::new(AuthState::default()),
        }
    }

    /// Snapshot of the current authentication state
    pub async fn state(&self) -> AuthState {
        self.state.read().await.clone()
    }

    /// Effective token rotation interval after normalization
    pub async fn token_rotation_interval(&self) -> u64 {
        let state = self.state.read().await;
        normalize_rotation_interval(self.config.auth.token_rotation_interval, state.token_ttl)
    }

    /// Authenticate against Vault with AppRole.
    ///
    /// Obtains a SecretID by unwrapping the configured wrapped token,
    /// falling back to the SecretID persisted in the bootstrap Secret when
    /// the wrapped token is invalid or missing. Exchanges it for a client
    /// token, best-effort revokes the predecessor credentials, and persists
    /// the new accessors. Persistence failure is fatal: losing the record
    /// would leak every future predecessor.
    pub async fn authenticate(&self) -> Result<()> {
        info!("Authentication by AppRole...");

        let (secret_id, minted) = match self.unwrap_configured_secret_id().await {
            Ok(secret_id) => (secret_id, true),
            Err(e) => {
                warn!(error = %e, "Unable to get SecretID from wrapped token");
                info!(
                    secret = %self.store.secret_name(),
                    namespace = %self.config.pod_namespace,
                    "Trying to get SecretID from the bootstrap secret"
                );
                let record = self.store.load().await?.ok_or_else(|| {
                    Error::auth(
                        "No valid wrapped token and no bootstrap secret with a prior SecretID",
                    )
                })?;
                if record.secret_id.is_empty() {
                    return Err(Error::auth(
                        "Bootstrap secret exists but holds no AppRole SecretID",
                    ));
                }
                (record.secret_id, false)
            }
        };

        let ttl = self.login_and_record(&secret_id).await?;
        self.log_interval_normalization(ttl);

        match self.revoke_previous_token().await {
            Ok(()) => self.metrics.set_token_revoke_error(false),
            Err(e) => {
                error!(error = %e, "Failed to revoke previous token");
                self.metrics.set_token_revoke_error(true);
            }
        }

        if minted {
            match self.revoke_previous_secret_id().await {
                Ok(()) => self.metrics.set_secret_id_revoke_error(false),
                Err(e) => {
                    error!(error = %e, "Failed to revoke previous SecretID");
                    self.metrics.set_secret_id_revoke_error(true);
                }
            }
        }

        let state = self.state.read().await;
        self.writer.upsert(&state.token_accessor, &state.secret_id).await?;

        info!("Successfully authenticated");

        Ok(())
    }

    /// Token rotation loop. Sleeps until the current token's rotation
    /// deadline, logs in again with the current SecretID, revokes the
    /// predecessor and persists the new accessor. Any failure waits 60
    /// seconds and retries.
    pub async fn run_token_rotation(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Token rotation enabled");

        loop {
            let (created_at, interval) = {
                let state = self.state.read().await;
                let interval = normalize_rotation_interval(
                    self.config.auth.token_rotation_interval,
                    state.token_ttl,
                );
                (state.token_created_at, interval)
            };
            let wait = (created_at + interval as i64 - unix_now()).max(0) as u64;
            self.metrics.set_token_next_rotation(unix_now() + wait as i64);
            debug!(seconds = wait, "Token will be rotated");
            if sleep_or_shutdown(Duration::from_secs(wait), &mut shutdown).await {
                return;
            }

            debug!("Rotating token...");
            let secret_id = self.state.read().await.secret_id.clone();
            match self.login_and_record(&secret_id).await {
                Err(e) => {
                    error!(error = %e, "Token rotation failed, retrying in 60 seconds");
                    self.metrics.set_token_last_rotation_status(false);
                    if sleep_or_shutdown(Duration::from_secs(ROTATION_RETRY_SECS), &mut shutdown)
                        .await
                    {
                        return;
                    }
                }
                Ok(_) => {
                    match self.revoke_previous_token().await {
                        Ok(()) => self.metrics.set_token_revoke_error(false),
                        Err(e) => {
                            error!(error = %e, "Failed to revoke previous token");
                            self.metrics.set_token_revoke_error(true);
                        }
                    }

                    let state = self.state.read().await.clone();
                    match self.writer.upsert(&state.token_accessor, &state.secret_id).await {
                        Ok(()) => self.metrics.set_token_persist_error(false),
                        Err(e) => {
                            error!(error = %e, "Failed to save token accessor in bootstrap secret");
                            self.metrics.set_token_persist_error(true);
                        }
                    }

                    debug!("Token successfully rotated");
                    self.metrics.set_token_last_rotation_status(true);
                }
            }
        }
    }

    /// SecretID rotation loop.
    ///
    /// Looks up the current SecretID to learn its TTL and creation time
    /// (exponential backoff while the lookup fails), sleeps until the
    /// rotation deadline, then mints a new SecretID, revokes the
    /// predecessor, and persists. A failed mint or persist retries after 60
    /// seconds without ever leaving an unpersisted SecretID in force.
    pub async fn run_secret_id_rotation(&self, mut shutdown: watch::Receiver<bool>) {
        let mut lookup_retry = LOOKUP_RETRY_BASE_SECS;
        let mount = self.config.auth.method.mount();
        info!("AppRole Secret ID rotation enabled");

        loop {
            let (role_name, secret_id) = {
                let state = self.state.read().await;
                (state.role_name.clone(), state.secret_id.clone())
            };

            let lookup = match self.vault.lookup_secret_id(mount, &role_name, &secret_id).await {
                Ok(Some(lookup)) => lookup,
                Ok(None) => {
                    error!(
                        seconds = lookup_retry,
                        "Current SecretID has no lookup result, rotation not armed; will retry"
                    );
                    self.metrics.set_secret_id_rotation_status(false);
                    if sleep_or_shutdown(Duration::from_secs(lookup_retry), &mut shutdown).await {
                        return;
                    }
                    lookup_retry *= 2;
                    continue;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        seconds = lookup_retry,
                        "SecretID lookup failed, rotation not armed; will retry"
                    );
                    self.metrics.set_secret_id_rotation_status(false);
                    if sleep_or_shutdown(Duration::from_secs(lookup_retry), &mut shutdown).await {
                        return;
                    }
                    lookup_retry *= 2;
                    continue;
                }
            };
            lookup_retry = LOOKUP_RETRY_BASE_SECS;
            self.metrics.set_secret_id_rotation_status(true);

            let interval = normalize_rotation_interval(
                self.config.auth.secret_id_rotation_interval,
                lookup.ttl,
            );
            let wait = (lookup.creation_time + interval as i64 - unix_now()).max(0) as u64;
            debug!(seconds = wait, "Secret ID will be rotated");
            self.metrics.set_secret_id_next_rotation(unix_now() + wait as i64);
            if sleep_or_shutdown(Duration::from_secs(wait), &mut shutdown).await {
                return;
            }

            loop {
                debug!("Rotating Secret ID...");
                let new_secret_id = match self.vault.generate_secret_id(mount, &role_name).await {
                    Err(e) => {
                        error!(
                            error = %e,
                            "Failed to generate new SecretID, retrying in 60 seconds"
                        );
                        self.metrics.set_secret_id_last_rotation_status(false);
                        if sleep_or_shutdown(
                            Duration::from_secs(ROTATION_RETRY_SECS),
                            &mut shutdown,
                        )
                        .await
                        {
                            return;
                        }
                        continue;
                    }
                    Ok(secret_id) => secret_id,
                };

                match self.revoke_previous_secret_id().await {
                    Ok(()) => self.metrics.set_secret_id_revoke_error(false),
                    Err(e) => {
                        error!(error = %e, "Failed to revoke previous SecretID");
                        self.metrics.set_secret_id_revoke_error(true);
                    }
                }

                self.state.write().await.secret_id = new_secret_id.clone();

                let token_accessor = self.state.read().await.token_accessor.clone();
                if let Err(e) = self.writer.upsert(&token_accessor, &new_secret_id).await {
                    error!(
                        error = %e,
                        "Failed to save SecretID in bootstrap secret, retrying in 60 seconds"
                    );
                    self.metrics.set_secret_id_last_rotation_status(false);
                    if sleep_or_shutdown(Duration::from_secs(ROTATION_RETRY_SECS), &mut shutdown)
                        .await
                    {
                        return;
                    }
                    continue;
                }

                debug!("Secret ID successfully rotated");
                self.metrics.set_secret_id_last_rotation_status(true);
                break;
            }
        }
    }

    async fn unwrap_configured_secret_id(&self) -> Result<String> {
        let wrapped = self
            .config
            .auth
            .wrapped_token
            .as_deref()
            .ok_or_else(|| Error::auth("No wrapped token configured"))?;
        info!("Getting SecretID from wrapped token");

        self.vault.unwrap_secret_id(wrapped).await
    }

    /// Log in with the given SecretID and replace the auth state. Returns
    /// the new token TTL.
    async fn login_and_record(&self, secret_id: &str) -> Result<u64> {
        let auth = &self.config.auth;
        debug!("Fetching token from Vault");
        let login = self.vault.login(auth.method.mount(), &auth.role_id, secret_id).await?;
        self.vault.set_token(&login.client_token).await;

        let ttl = login.lease_duration;
        let mut state = self.state.write().await;
        *state = AuthState {
            token_accessor: login.accessor,
            token_ttl: ttl,
            token_created_at: unix_now(),
            secret_id: secret_id.to_string(),
            role_name: login.role_name,
        };

        Ok(ttl)
    }

    fn log_interval_normalization(&self, ttl: u64) {
        let configured = self.config.auth.token_rotation_interval;
        let effective = normalize_rotation_interval(configured, ttl);
        if configured < 0 {
            info!(
                seconds = effective,
                "TOKEN_ROTATION_INTERVAL wasn't defined, derived from the token TTL"
            );
        } else if configured as u64 >= ttl {
            info!(
                seconds = effective,
                "TOKEN_ROTATION_INTERVAL is at or above the token TTL, derived from the token TTL"
            );
        }
    }

    /// Revoke the predecessor token recorded in the bootstrap Secret.
    async fn revoke_previous_token(&self) -> Result<()> {
        let record = match self.store.load().await? {
            Some(record) => record,
            None => {
                debug!("No bootstrap secret, no previous token to revoke");
                return Ok(());
            }
        };
        if record.token_accessor.is_empty() {
            debug!("No token accessor in the bootstrap secret");
            return Ok(());
        }

        debug!("Revoking previous token by its accessor");
        self.vault.revoke_token_accessor(&record.token_accessor).await
    }

    /// Revoke the predecessor SecretID recorded in the bootstrap Secret.
    /// A SecretID the lookup no longer knows counts as already revoked.
    async fn revoke_previous_secret_id(&self) -> Result<()> {
        let record = match self.store.load().await? {
            Some(record) => record,
            None => {
                debug!("No bootstrap secret, no previous SecretID to revoke");
                return Ok(());
            }
        };
        if record.secret_id.is_empty() {
            debug!("No SecretID in the bootstrap secret");
            return Ok(());
        }

        let mount = self.config.auth.method.mount();
        let role_name = self.state.read().await.role_name.clone();
        match self.vault.lookup_secret_id(mount, &role_name, &record.secret_id).await? {
            None => {
                debug!("There is no valid SecretID to revoke");
                Ok(())
            }
            Some(lookup) => {
                debug!("Revoking previous SecretID by its accessor");
                self.vault.destroy_secret_id_accessor(mount, &role_name, &lookup.accessor).await
            }
        }
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Sleep for `duration` unless the shutdown signal fires first. Returns
/// whether shutdown was requested.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unset_interval_derives_from_ttl() {
        assert_eq!(normalize_rotation_interval(-1, 3600), 2520);
        assert_eq!(normalize_rotation_interval(-1, 100), 70);
    }

    #[test]
    fn test_normalize_interval_at_or_above_ttl_derives_from_ttl() {
        assert_eq!(normalize_rotation_interval(3600, 3600), 2520);
        assert_eq!(normalize_rotation_interval(5000, 3600), 2520);
    }

    #[test]
    fn test_normalize_valid_interval_kept() {
        assert_eq!(normalize_rotation_interval(600, 3600), 600);
        assert_eq!(normalize_rotation_interval(3599, 3600), 3599);
    }

    #[test]
    fn test_normalized_interval_is_below_ttl() {
        for ttl in [2u64, 60, 3600, 86400] {
            for configured in [-1i64, 0, 1, 30, 10_000] {
                let interval = normalize_rotation_interval(configured, ttl);
                assert!(
                    interval < ttl,
                    "interval {} not below ttl {} for configured {}",
                    interval,
                    ttl,
                    configured
                );
            }
        }
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown_signals() {
        let (tx, mut rx) = watch::channel(false);

        // Expired timer without a signal reports no shutdown.
        assert!(!sleep_or_shutdown(Duration::from_millis(1), &mut rx).await);

        tx.send(true).unwrap();
        assert!(sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await);
    }
}
