use thiserror::Error;

/// The closed set of tagged error kinds the core can raise. Each component
/// returns one of these at its boundary; internal helpers are free to use
/// `anyhow` chains that get converted here via `.context(...)` + `map_err`.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("authentication failed for {user}@{host}: {reason}")]
    AuthError {
        user: String,
        host: String,
        reason: String,
    },

    #[error("network error talking to {host}: {reason}")]
    NetworkError { host: String, reason: String },

    #[error("remote command failed (exit {exit_code}): {stderr}")]
    RemoteExecError { exit_code: i32, stderr: String },

    #[error("unsupported host distribution '{distro_id}': {hint}")]
    UnsupportedHostError { distro_id: String, hint: String },

    #[error("post-install verification failed for {dependency}: {detail}")]
    InstallVerificationError { dependency: String, detail: String },

    #[error("image build failed: {stderr_tail}")]
    BuildFailed { stderr_tail: String },

    #[error("container did not become healthy within {waited_secs}s")]
    StartupTimeout { waited_secs: u64 },

    #[error("backup could not quiesce the container within {grace_secs}s")]
    BackupNotQuiesced { grace_secs: u64 },

    #[error("no previous version exists for deployment '{deployment_id}'")]
    NoPreviousVersion { deployment_id: String },

    #[error("secret '{name}' is not set")]
    SecretMissing { name: String },

    #[error("secret '{name}' failed authentication (corrupt or tampered)")]
    SecretCorrupt { name: String },

    #[error("deployment '{deployment_id}' is busy (locked by another operation)")]
    DeploymentBusy { deployment_id: String },

    #[error("deployment '{deployment_id}' is in an inconsistent state: {detail}")]
    DeploymentInconsistent { deployment_id: String, detail: String },

    #[error("update failed ({original}), auto-rollback succeeded={auto_rollback_succeeded}")]
    UpdateFailed {
        original: Box<DeploymentError>,
        auto_rollback_succeeded: bool,
    },
}

impl DeploymentError {
    /// Maps this error kind to the process exit code documented for the CLI
    /// collaborator. The Coordinator is the only layer allowed to call this.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeploymentError::ConfigInvalid(_) => 2,
            DeploymentError::AuthError { .. } => 3,
            DeploymentError::NetworkError { .. } => 4,
            DeploymentError::RemoteExecError { .. } => 5,
            DeploymentError::UnsupportedHostError { .. } => 5,
            DeploymentError::InstallVerificationError { .. } => 5,
            DeploymentError::BuildFailed { .. } => 1,
            DeploymentError::StartupTimeout { .. } => 1,
            DeploymentError::BackupNotQuiesced { .. } => 1,
            DeploymentError::NoPreviousVersion { .. } => 1,
            DeploymentError::SecretMissing { .. } => 2,
            DeploymentError::SecretCorrupt { .. } => 2,
            DeploymentError::DeploymentBusy { .. } => 6,
            DeploymentError::DeploymentInconsistent { .. } => 7,
            DeploymentError::UpdateFailed { original, .. } => original.exit_code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeploymentError>;
