//! Typed listener errors.
//!
//! Every error implements `thiserror::Error`; the binary wraps them in
//! `anyhow::Error` with `?`.

use thiserror::Error;

// ── Configuration errors ──────────────────────────────────────────────────────

/// A response header string that cannot be sent as-is.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("response header '{0}' is not of the form 'Key: Value'")]
    MalformedHeader(String),

    #[error("response header '{0}' has an invalid name")]
    InvalidHeaderName(String),

    #[error("response header '{0}' has an invalid value")]
    InvalidHeaderValue(String),
}

// ── Lifecycle errors ──────────────────────────────────────────────────────────

/// Why `start` refused to bring a listener up. Nothing is registered or
/// bound when any of these is returned.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("listener name not set")]
    MissingName,

    #[error("listener hosts not set")]
    MissingHosts,

    #[error("listener port not set")]
    MissingPort,

    #[error("listener uris not set")]
    MissingUris,

    #[error("listener '{0}' is already running")]
    AlreadyActive(String),

    #[error("failed to provision TLS material for listener '{0}'")]
    Tls(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Failures of the shutdown itself. A shutdown that outlived the grace
/// period is not an error, see `StopOutcome::TimedOut`.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("listener is not running")]
    NotRunning,

    #[error("serve task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// ── Registry errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a listener named '{0}' already exists")]
    DuplicateListener(String),

    #[error("agent {0:#010x} is already registered")]
    DuplicateAgent(u32),
}

// ── Certificate errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CertError {
    #[error("listener name '{0}' has no alphanumeric characters")]
    UnusableName(String),

    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
