pub mod exec;
pub mod known_hosts;

use std::path::PathBuf;
use std::time::Duration;

use openssh::{KnownHosts as OpensshKnownHosts, Session as OpensshSession, SessionBuilder};
use tracing::debug;

use crate::config::{AuthConfig, DeploymentConfig};
use crate::error::DeploymentError;

pub use known_hosts::KnownHostsStore;

/// One authenticated shell + file-transfer channel to a host (C1). Exclusively
/// owned by the Coordinator call that opened it; closed on every exit path.
pub struct RemoteSession {
    session: OpensshSession,
    host: String,
    user: String,
}

/// Default soft timeout for a single `run`, extendable per call.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) const NETWORK_RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

impl RemoteSession {
    /// Connects to `config.host` as `config.user`, pinning the host key
    /// against the workstation's known-hosts store before ever invoking the
    /// underlying transport. A fingerprint mismatch never reaches the
    /// network layer.
    pub async fn connect(
        config: &DeploymentConfig,
        known_hosts: &KnownHostsStore,
    ) -> Result<Self, DeploymentError> {
        known_hosts.verify_or_pin(&config.host, config.port)?;

        debug!("connecting to {}@{}", config.user, config.host);

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(OpensshKnownHosts::Accept);
        builder.user(config.user.clone());
        builder.port(config.port);

        if let AuthConfig::Key { path } = &config.auth {
            builder.keyfile(path.clone());
        }

        let session = connect_with_retry(&builder, &config.host).await?;

        Ok(Self {
            session,
            host: config.host.clone(),
            user: config.user.clone(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub async fn close(self) -> Result<(), DeploymentError> {
        self.session
            .close()
            .await
            .map_err(|e| DeploymentError::NetworkError {
                host: self.host.clone(),
                reason: format!("failed to close session: {e}"),
            })
    }
}

async fn connect_with_retry(
    builder: &SessionBuilder,
    host: &str,
) -> Result<OpensshSession, DeploymentError> {
    let mut last_err = None;

    for (attempt, delay_secs) in std::iter::once(0).chain(NETWORK_RETRY_DELAYS_SECS).enumerate() {
        if attempt > 0 {
            debug!(
                "retrying connection to {} in {}s (attempt {})",
                host, delay_secs, attempt
            );
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }

        match builder.connect(host).await {
            Ok(session) => return Ok(session),
            Err(e) => last_err = Some(e),
        }
    }

    Err(DeploymentError::NetworkError {
        host: host.to_string(),
        reason: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown connection failure".to_string()),
    })
}

/// The command+transfer surface every higher-level component depends on.
/// `RemoteSession` is the only production implementor; tests substitute a
/// recording stub so the Coordinator and its components can run without a
/// real host, the same "fake transport" idiom the renderer tests use for
/// template output.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    async fn run(&self, cmd: &str, timeout: Option<Duration>) -> Result<exec::CommandOutput, DeploymentError>;
    async fn exec(&self, cmd: &str) -> Result<String, DeploymentError>;
    async fn exec_ok(&self, cmd: &str) -> Result<bool, DeploymentError>;
    async fn exists(&self, path: &str) -> Result<bool, DeploymentError>;
    async fn upload(&self, bytes: &[u8], path: &str, mode: u32) -> Result<(), DeploymentError>;
    async fn download(&self, path: &str) -> Result<Vec<u8>, DeploymentError>;
    async fn write_text_file(&self, path: &str, content: &str) -> Result<(), DeploymentError>;
    async fn sudo_exec(&self, cmd: &str) -> Result<String, DeploymentError>;
    async fn sudo_exec_with_password(
        &self,
        cmd: &str,
        password: Option<&str>,
    ) -> Result<String, DeploymentError>;
    async fn atomic_symlink(&self, target: &str, link: &str) -> Result<(), DeploymentError>;
    fn host(&self) -> &str;
    fn user(&self) -> &str;
}

#[async_trait::async_trait]
impl Session for RemoteSession {
    async fn run(&self, cmd: &str, timeout: Option<Duration>) -> Result<exec::CommandOutput, DeploymentError> {
        RemoteSession::run(self, cmd, timeout).await
    }

    async fn exec(&self, cmd: &str) -> Result<String, DeploymentError> {
        RemoteSession::exec(self, cmd).await
    }

    async fn exec_ok(&self, cmd: &str) -> Result<bool, DeploymentError> {
        RemoteSession::exec_ok(self, cmd).await
    }

    async fn exists(&self, path: &str) -> Result<bool, DeploymentError> {
        RemoteSession::exists(self, path).await
    }

    async fn upload(&self, bytes: &[u8], path: &str, mode: u32) -> Result<(), DeploymentError> {
        RemoteSession::upload(self, bytes, path, mode).await
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, DeploymentError> {
        RemoteSession::download(self, path).await
    }

    async fn write_text_file(&self, path: &str, content: &str) -> Result<(), DeploymentError> {
        RemoteSession::write_text_file(self, path, content).await
    }

    async fn sudo_exec(&self, cmd: &str) -> Result<String, DeploymentError> {
        RemoteSession::sudo_exec(self, cmd).await
    }

    async fn sudo_exec_with_password(
        &self,
        cmd: &str,
        password: Option<&str>,
    ) -> Result<String, DeploymentError> {
        RemoteSession::sudo_exec_with_password(self, cmd, password).await
    }

    async fn atomic_symlink(&self, target: &str, link: &str) -> Result<(), DeploymentError> {
        RemoteSession::atomic_symlink(self, target, link).await
    }

    fn host(&self) -> &str {
        RemoteSession::host(self)
    }

    fn user(&self) -> &str {
        RemoteSession::user(self)
    }
}

/// Directory holding process-wide workstation state: the vault key and the
/// known-hosts store. Initialized once at process start.
pub fn app_home(app_name: &str) -> Result<PathBuf, DeploymentError> {
    let home = dirs::home_dir().ok_or_else(|| {
        DeploymentError::ConfigInvalid("could not determine home directory".to_string())
    })?;
    Ok(home.join(format!(".{app_name}")))
}
