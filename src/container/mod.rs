use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::DeploymentError;
use crate::layout::RemoteLayout;
use crate::ssh::Session;

const DEFAULT_HEALTH_DEADLINE: Duration = Duration::from_secs(120);
const DEFAULT_HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);
const RECENT_ERROR_BYTE_BUDGET: usize = 16 * 1024;

/// `swap`'s cutover strategy. Only `InPlace` exists today; blue/green
/// overlap is left as an extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStrategy {
    InPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRunState {
    Absent,
    Built,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: ContainerRunState,
    pub image_digest: Option<String>,
    pub uptime_seconds: u64,
    pub restarts: u32,
    pub recent_error_lines: String,
}

/// Container Lifecycle Manager (C7): drives the remote container through
/// `build -> up -> (stop|update) -> ...` via the compose tool.
pub struct ContainerManager<'a> {
    session: &'a dyn Session,
    layout: &'a RemoteLayout<'a>,
}

impl<'a> ContainerManager<'a> {
    pub fn new(session: &'a dyn Session, layout: &'a RemoteLayout<'a>) -> Self {
        Self { session, layout }
    }

    /// Invokes the build, returning the image digest parsed from structured
    /// build output.
    pub async fn build(&self, version_id: &str) -> Result<String, DeploymentError> {
        let dir = self.layout.version_dir(version_id);

        let out = self
            .session
            .run(&format!("cd {dir} && docker compose build --quiet"), None)
            .await?;

        if !out.success() {
            return Err(DeploymentError::BuildFailed {
                stderr_tail: tail(&out.stderr, RECENT_ERROR_BYTE_BUDGET),
            });
        }

        let digest = self
            .session
            .exec(&format!(
                "cd {dir} && docker compose images --format json | head -n1 | sed -n 's/.*\"ID\":\"\\([^\"]*\\)\".*/\\1/p'"
            ))
            .await
            .unwrap_or_default();

        let digest = digest.trim();
        if digest.is_empty() {
            return Err(DeploymentError::BuildFailed {
                stderr_tail: "build reported success but no image digest could be parsed"
                    .to_string(),
            });
        }

        Ok(digest.to_string())
    }

    /// Whether the container bound to `current/` is already running with
    /// `config_hash`. Exposed so callers can short-circuit an entire
    /// render/build/record cycle before it starts, not just the final
    /// `docker compose up -d`.
    pub async fn is_running_with_config_hash(&self, config_hash: &str) -> Result<bool, DeploymentError> {
        Ok(matches!(self.already_running(config_hash).await?, AlreadyRunning::Yes))
    }

    /// Starts the container bound to `current/`. A no-op if the compose
    /// tool reports the container already running with the same config
    /// hash. Blocks until healthy or `deadline` elapses.
    pub async fn up(&self, config_hash: &str, deadline: Duration) -> Result<(), DeploymentError> {
        if let AlreadyRunning::Yes = self.already_running(config_hash).await? {
            debug!("container already running with matching config_hash, up is a no-op");
            return Ok(());
        }

        let current = self.layout.current();
        self.session
            .exec(&format!("cd {current} && docker compose up -d"))
            .await?;

        self.wait_until_healthy(&current, deadline).await
    }

    pub async fn stop(&self, grace: Duration) -> Result<(), DeploymentError> {
        let current = self.layout.current();
        self.session
            .exec(&format!(
                "cd {current} && docker compose stop -t {}",
                grace.as_secs()
            ))
            .await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<StatusReport, DeploymentError> {
        let current = self.layout.current();

        if !self.session.exists(&current).await? {
            return Ok(StatusReport {
                state: ContainerRunState::Absent,
                image_digest: None,
                uptime_seconds: 0,
                restarts: 0,
                recent_error_lines: String::new(),
            });
        }

        let container_id = self
            .session
            .exec(&format!("cd {current} && docker compose ps -q"))
            .await
            .unwrap_or_default()
            .trim()
            .to_string();

        if container_id.is_empty() {
            return Ok(StatusReport {
                state: ContainerRunState::Built,
                image_digest: None,
                uptime_seconds: 0,
                restarts: 0,
                recent_error_lines: String::new(),
            });
        }

        let inspect = self
            .session
            .exec(&format!(
                "docker inspect --format '{{{{.State.Running}}}}|{{{{.State.StartedAt}}}}|{{{{.RestartCount}}}}|{{{{.Image}}}}' {container_id}"
            ))
            .await
            .unwrap_or_default();

        let mut parts = inspect.trim().splitn(4, '|');
        let running = parts.next().unwrap_or("false") == "true";
        let started_at = parts.next().unwrap_or_default();
        let restarts: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let image_digest = parts.next().map(str::to_string);

        let uptime_seconds = started_at
            .parse::<chrono::DateTime<chrono::Utc>>()
            .map(|started| (chrono::Utc::now() - started).num_seconds().max(0) as u64)
            .unwrap_or(0);

        let recent_error_lines = self
            .session
            .exec(&format!(
                "docker logs --tail 200 {container_id} 2>&1 1>/dev/null | tail -c {RECENT_ERROR_BYTE_BUDGET}"
            ))
            .await
            .unwrap_or_default();

        Ok(StatusReport {
            state: if running {
                ContainerRunState::Running
            } else {
                ContainerRunState::Stopped
            },
            image_digest,
            uptime_seconds,
            restarts,
            recent_error_lines,
        })
    }

    /// Atomically rebinds `current/` to `new_version_id` and reloads the
    /// container; the old container is stopped only after the new one
    /// reports healthy, and `current/` is reverted on any failure.
    pub async fn swap(
        &self,
        new_version_id: &str,
        _strategy: SwapStrategy,
        deadline: Duration,
    ) -> Result<(), DeploymentError> {
        let previous_target = self
            .session
            .exec(&format!("readlink -f {}", self.layout.current()))
            .await
            .ok();

        let new_dir = self.layout.version_dir(new_version_id);
        self.session
            .atomic_symlink(&new_dir, &self.layout.current())
            .await?;

        let result = async {
            self.session
                .exec(&format!(
                    "cd {} && docker compose up -d --force-recreate",
                    self.layout.current()
                ))
                .await?;
            self.wait_until_healthy(&self.layout.current(), deadline).await
        }
        .await;

        if let Err(e) = result {
            warn!("swap to {} failed health gate, reverting current/", new_version_id);
            if let Some(previous) = previous_target {
                let _ = self
                    .session
                    .atomic_symlink(previous.trim(), &self.layout.current())
                    .await;
                let _ = self
                    .session
                    .exec(&format!(
                        "cd {} && docker compose up -d --force-recreate",
                        self.layout.current()
                    ))
                    .await;
            }
            return Err(e);
        }

        Ok(())
    }

    async fn wait_until_healthy(
        &self,
        compose_dir: &str,
        deadline: Duration,
    ) -> Result<(), DeploymentError> {
        let started = Instant::now();

        let container_id = self
            .session
            .exec(&format!("cd {compose_dir} && docker compose ps -q"))
            .await?
            .trim()
            .to_string();

        loop {
            let status = self
                .session
                .exec(&format!(
                    "docker inspect --format='{{{{.State.Health.Status}}}}' {container_id} 2>/dev/null || echo none"
                ))
                .await
                .unwrap_or_default();

            match status.trim() {
                "healthy" | "none" => return Ok(()),
                "unhealthy" => {
                    return Err(DeploymentError::StartupTimeout {
                        waited_secs: started.elapsed().as_secs(),
                    })
                }
                _ => {}
            }

            if started.elapsed() >= deadline {
                return Err(DeploymentError::StartupTimeout {
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(DEFAULT_HEALTH_POLL_INTERVAL).await;
        }
    }

    async fn already_running(&self, config_hash: &str) -> Result<AlreadyRunning, DeploymentError> {
        let current = self.layout.current();
        if !self.session.exists(&current).await? {
            return Ok(AlreadyRunning::No);
        }

        let running = self
            .session
            .exec_ok(&format!(
                "cd {current} && [ \"$(docker compose ps -q | wc -l)\" -gt 0 ]"
            ))
            .await?;
        if !running {
            return Ok(AlreadyRunning::No);
        }

        let label = self
            .session
            .exec(&format!(
                "cd {current} && docker compose ps --format json | head -n1 | sed -n 's/.*\"Labels\":\"[^\"]*config_hash={}[^\"]*\".*/match/p'",
                config_hash
            ))
            .await
            .unwrap_or_default();

        Ok(if label.trim() == "match" {
            AlreadyRunning::Yes
        } else {
            AlreadyRunning::No
        })
    }
}

enum AlreadyRunning {
    Yes,
    No,
}

fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        let mut start = s.len() - max_bytes;
        while !s.is_char_boundary(start) {
            start += 1;
        }
        s[start..].to_string()
    }
}

pub fn default_health_deadline() -> Duration {
    DEFAULT_HEALTH_DEADLINE
}
