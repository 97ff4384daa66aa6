//! # Error Types
//!
//! Error types for the vault-to-k8s operator using `thiserror`.
//!
//! Errors fall into four operational classes:
//! - fatal at startup (configuration, initial authentication, mount
//!   validation, bootstrap ownership violations): surfaced from `main`
//!   with a non-zero exit
//! - fatal per namespace (Vault entry read, Secret update): aborts the
//!   current namespace, the engine continues
//! - per-entry skips: never represented as an `Error`, only counted
//! - transient rotation failures: handled inside the rotation loops with
//!   their retry schedules

/// Custom result type for operator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the operator
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Vault API errors with additional context
    #[error("Vault error: {context}")]
    Vault {
        context: String,
        #[source]
        source: vaultrs::error::ClientError,
    },

    /// Kubernetes API errors with additional context
    #[error("Kubernetes error: {context}")]
    Kubernetes {
        context: String,
        #[source]
        source: kube::Error,
    },

    /// Authentication failures against Vault
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Refusal to touch a Secret the operator does not own
    #[error("Ownership error: secret '{secret}' in namespace '{namespace}': {message}")]
    Ownership {
        secret: String,
        namespace: String,
        message: String,
    },

    /// The configured secrets path does not resolve to a usable mount
    #[error("{message}")]
    MountValidation { message: String },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a Vault error with context
    pub fn vault<S: Into<String>>(context: S, source: vaultrs::error::ClientError) -> Self {
        Self::Vault { context: context.into(), source }
    }

    /// Create a Kubernetes error with context
    pub fn kubernetes<S: Into<String>>(context: S, source: kube::Error) -> Self {
        Self::Kubernetes { context: context.into(), source }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth { message: message.into() }
    }

    /// Create an ownership error
    pub fn ownership<S, N, M>(secret: S, namespace: N, message: M) -> Self
    where
        S: Into<String>,
        N: Into<String>,
        M: Into<String>,
    {
        Self::Ownership {
            secret: secret.into(),
            namespace: namespace.into(),
            message: message.into(),
        }
    }

    /// Create a mount validation error
    pub fn mount<S: Into<String>>(message: S) -> Self {
        Self::MountValidation { message: message.into() }
    }

    /// Create an I/O error with context
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}
