use serde::{Deserialize, Serialize};

use crate::error::DeploymentError;
use crate::ssh::Session;

pub const CURRENT_FORMAT_VERSION: u32 = 1;
const LOCK_RETRY_DELAYS_MS: [u64; 4] = [50, 100, 250, 500];

/// Host-side path conventions for one deployment, rooted at
/// `<home>/deployments/<deployment_id>/`.
pub struct RemoteLayout<'a> {
    session: &'a dyn Session,
    root: String,
}

/// Observable lifecycle state of the remote container, mirrored in
/// `state.json.container_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Absent,
    Built,
    Running,
    Stopped,
    Inconsistent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub active_version: Option<String>,
    pub last_backup: Option<String>,
    pub container_state: ContainerState,
    pub format_version: u32,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            active_version: None,
            last_backup: None,
            container_state: ContainerState::Absent,
            format_version: CURRENT_FORMAT_VERSION,
        }
    }
}

impl<'a> RemoteLayout<'a> {
    pub fn new(session: &'a dyn Session, home: &str, deployment_id: &str) -> Self {
        Self {
            session,
            root: format!("{home}/deployments/{deployment_id}"),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn current(&self) -> String {
        format!("{}/current", self.root)
    }

    pub fn version_dir(&self, id: &str) -> String {
        format!("{}/versions/{id}", self.root)
    }

    pub fn versions_root(&self) -> String {
        format!("{}/versions", self.root)
    }

    pub fn backup_dir(&self, timestamp: &str) -> String {
        format!("{}/backups/{timestamp}", self.root)
    }

    pub fn backups_root(&self) -> String {
        format!("{}/backups", self.root)
    }

    pub fn secrets_env(&self) -> String {
        format!("{}/secrets.env", self.root)
    }

    pub fn state_file(&self) -> String {
        format!("{}/state.json", self.root)
    }

    /// Materializes the directory skeleton and an empty `state.json` if one
    /// doesn't already exist. Idempotent.
    pub async fn ensure_created(&self) -> Result<(), DeploymentError> {
        self.session
            .exec(&format!(
                "mkdir -p {}/versions {}/backups",
                self.root, self.root
            ))
            .await?;

        if !self.session.exists(&self.state_file()).await? {
            self.write_state(&StateFile::default()).await?;
        }

        Ok(())
    }

    /// Checks the layout invariant: `current/` points at a directory under
    /// `versions/` whose id matches `state.json.active_version`.
    pub async fn verify_invariants(&self) -> Result<(), DeploymentError> {
        let state = self.read_state().await?;

        let Some(active) = &state.active_version else {
            return Ok(());
        };

        if !self.session.exists(&self.version_dir(active)).await? {
            return Err(DeploymentError::DeploymentInconsistent {
                deployment_id: self.root.clone(),
                detail: format!("active_version '{active}' has no versions/ directory"),
            });
        }

        let target = self
            .session
            .exec(&format!("readlink -f {}", self.current()))
            .await
            .unwrap_or_default();

        if !target.trim().ends_with(active.as_str()) {
            return Err(DeploymentError::DeploymentInconsistent {
                deployment_id: self.root.clone(),
                detail: "current/ does not point at the active version".to_string(),
            });
        }

        Ok(())
    }

    pub async fn read_state(&self) -> Result<StateFile, DeploymentError> {
        if !self.session.exists(&self.state_file()).await? {
            return Ok(StateFile::default());
        }

        let bytes = self.session.download(&self.state_file()).await?;
        let state: StateFile = serde_json::from_slice(&bytes).map_err(|e| {
            DeploymentError::DeploymentInconsistent {
                deployment_id: self.root.clone(),
                detail: format!("state.json is unreadable: {e}"),
            }
        })?;

        if state.format_version != CURRENT_FORMAT_VERSION {
            return Err(DeploymentError::DeploymentInconsistent {
                deployment_id: self.root.clone(),
                detail: format!(
                    "state.json format_version {} is not supported (expected {})",
                    state.format_version, CURRENT_FORMAT_VERSION
                ),
            });
        }

        Ok(state)
    }

    pub async fn write_state(&self, state: &StateFile) -> Result<(), DeploymentError> {
        let json = serde_json::to_vec_pretty(state).expect("StateFile always serializes");
        self.session.upload(&json, &self.state_file(), 0o644).await
    }

    /// Acquires the deployment-scoped lock via an atomic `mkdir`, retrying
    /// briefly before giving up with `DeploymentBusy`. `flock` doesn't
    /// survive across the separate exec invocations a Coordinator operation
    /// makes, so a lock directory plays the same role: one atomic syscall
    /// decides the winner.
    pub async fn acquire_lock(&self) -> Result<DeploymentLock<'a>, DeploymentError> {
        let lock_dir = format!("{}/.lock", self.root);
        self.session
            .exec(&format!("mkdir -p {}", self.root))
            .await?;

        for delay_ms in std::iter::once(0).chain(LOCK_RETRY_DELAYS_MS) {
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }

            if self.session.exec_ok(&format!("mkdir {lock_dir}")).await? {
                return Ok(DeploymentLock {
                    session: self.session,
                    lock_dir,
                });
            }
        }

        Err(DeploymentError::DeploymentBusy {
            deployment_id: self.root.clone(),
        })
    }
}

/// RAII-style handle held for the duration of a Coordinator operation.
/// Release explicitly with `release()`; dropping without releasing leaves
/// the lock in place deliberately (an async drop can't clean up the remote
/// side, and a stuck lock is safer than a silently-abandoned mutation).
pub struct DeploymentLock<'a> {
    session: &'a dyn Session,
    lock_dir: String,
}

impl<'a> DeploymentLock<'a> {
    pub async fn release(self) -> Result<(), DeploymentError> {
        self.session.exec(&format!("rmdir {}", self.lock_dir)).await?;
        Ok(())
    }
}
