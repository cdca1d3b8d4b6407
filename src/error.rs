//! Error types for values loading, external commands and the status/install flows.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the values file. Always raised before any external command runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read values file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("values file is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("values file must contain a mapping at the top level")]
    NotAMapping,

    #[error("missing required field in values file: '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("scaling.min_replicas ({min}) must not exceed scaling.max_replicas ({max})")]
    ReplicaBounds { min: u32, max: u32 },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of an external `kubectl`/`helm`/`sh` invocation.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The binary is not on PATH
    #[error("'{program}' not found; is it installed and on PATH?")]
    NotInstalled { program: String },

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit; stderr is kept verbatim
    #[error("'{command}' failed (exit code {code}): {stderr}")]
    Failed {
        command: String,
        code: String,
        stderr: String,
    },

    /// Non-zero exit reporting a missing resource
    #[error("'{command}' reported the resource as not found: {stderr}")]
    NotFound { command: String, stderr: String },

    #[error("could not decode output of '{command}': {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not serialize manifest: {0}")]
    Encode(#[from] serde_yaml::Error),
}

impl CommandError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::NotFound { .. })
    }
}

/// `get-status` failures.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Deployment '{name}' not found in namespace '{namespace}'.")]
    DeploymentNotFound { name: String, namespace: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// `install-tools` failures, one per step that can go wrong.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("automatic Helm installation is not supported on this platform; install it from https://helm.sh/docs/intro/install/")]
    UnsupportedPlatform,

    #[error("Helm is not installed and bootstrap was disabled; install it from https://helm.sh/docs/intro/install/")]
    HelmMissing,

    #[error("the Helm install script ran, but '{0}' is still not on PATH; restart your shell or update PATH")]
    HelmNotOnPath(String),

    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("Deployment '{name}' in namespace '{namespace}' did not become ready after {attempts} attempts")]
    NotReady {
        name: String,
        namespace: String,
        attempts: u32,
    },
}

/// Result type alias for external command calls
pub type CommandResult<T> = std::result::Result<T, CommandError>;
