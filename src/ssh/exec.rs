use std::time::{Duration, Instant};

use base64::Engine as _;
use tracing::debug;

use crate::error::DeploymentError;

use super::{RemoteSession, DEFAULT_RUN_TIMEOUT, NETWORK_RETRY_DELAYS_SECS};

/// Result of `RemoteSession::run`.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl RemoteSession {
    /// Pure passthrough: runs `cmd` under `bash -c`, subject to a soft
    /// timeout. Callers are responsible for idempotency of `cmd` itself.
    /// A transport-level `NetworkError` (timeout or channel failure) is
    /// retried with the same backoff used to establish the connection;
    /// a non-zero exit from `cmd` itself is not.
    pub async fn run(
        &self,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DeploymentError> {
        let mut last_err = None;

        for (attempt, delay_secs) in std::iter::once(0).chain(NETWORK_RETRY_DELAYS_SECS).enumerate() {
            if attempt > 0 {
                debug!(
                    "[{}] retrying command in {}s (attempt {}): {}",
                    self.host(),
                    delay_secs,
                    attempt,
                    truncate(cmd, 200)
                );
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            }

            match self.run_once(cmd, timeout).await {
                Ok(output) => return Ok(output),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.expect("loop runs at least once"))
    }

    async fn run_once(
        &self,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, DeploymentError> {
        let timeout = timeout.unwrap_or(DEFAULT_RUN_TIMEOUT);
        let started = Instant::now();
        debug!("[{}] run: {}", self.host(), truncate(cmd, 200));

        let fut = self.session.command("bash").arg("-c").arg(cmd).output();

        let output = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| DeploymentError::NetworkError {
                host: self.host().to_string(),
                reason: format!(
                    "command timed out after {:?}: {}",
                    timeout,
                    truncate(cmd, 200)
                ),
            })?
            .map_err(|e| DeploymentError::NetworkError {
                host: self.host().to_string(),
                reason: format!("transport error: {e}"),
            })?;

        debug!(
            "[{}] finished in {:?} (exit {:?})",
            self.host(),
            started.elapsed(),
            output.status.code()
        );

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Runs `cmd`, returning stdout on success or `RemoteExecError` on a
    /// non-zero exit. The common case for the Coordinator's own steps.
    pub async fn exec(&self, cmd: &str) -> Result<String, DeploymentError> {
        let out = self.run(cmd, None).await?;
        if !out.success() {
            return Err(DeploymentError::RemoteExecError {
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    pub async fn exec_ok(&self, cmd: &str) -> Result<bool, DeploymentError> {
        Ok(self.run(cmd, None).await?.success())
    }

    pub async fn exists(&self, path: &str) -> Result<bool, DeploymentError> {
        self.exec_ok(&format!("test -e {}", shell_quote(path))).await
    }

    /// Writes `content` to `path` on the host. Binary-safe: content is
    /// base64-transported over the exec channel rather than interpolated
    /// into a heredoc, so arbitrary bytes (including the vault's ciphertext)
    /// round-trip exactly. Old contents are replaced atomically.
    pub async fn upload(&self, bytes: &[u8], path: &str, mode: u32) -> Result<(), DeploymentError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let tmp = format!("{path}.upload.tmp");

        self.exec(&format!(
            "printf '%s' '{encoded}' | base64 -d > {tmp} && chmod {mode:o} {tmp} && mv -f {tmp} {path}",
            encoded = encoded,
            tmp = shell_quote(&tmp),
            mode = mode,
            path = shell_quote(path),
        ))
        .await?;

        Ok(())
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>, DeploymentError> {
        let encoded = self.exec(&format!("base64 {}", shell_quote(path))).await?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim().replace(['\n', '\r'], ""))
            .map_err(|e| DeploymentError::RemoteExecError {
                exit_code: -1,
                stderr: format!("failed to decode downloaded content: {e}"),
            })
    }

    /// Writes a small amount of *text* directly via heredoc — used for
    /// artifacts the Coordinator already knows are free of the heredoc
    /// terminator, e.g. rendered recipe files.
    pub async fn write_text_file(&self, path: &str, content: &str) -> Result<(), DeploymentError> {
        let escaped = content.replace('\'', "'\\''");
        self.exec(&format!(
            "cat > {} << 'FLEETCRATE_EOF'\n{}\nFLEETCRATE_EOF",
            shell_quote(path),
            escaped
        ))
        .await?;
        Ok(())
    }

    pub async fn sudo_exec(&self, cmd: &str) -> Result<String, DeploymentError> {
        self.exec(&format!("sudo bash -c '{}'", cmd.replace('\'', "'\\''")))
            .await
    }

    /// Runs `sudo -n cmd`; on failure, falls back to a single `sudo -S`
    /// invocation fed the password on stdin. The password never touches an
    /// argv, a log line, or disk.
    pub async fn sudo_exec_with_password(
        &self,
        cmd: &str,
        password: Option<&str>,
    ) -> Result<String, DeploymentError> {
        let non_interactive = format!("sudo -n bash -c '{}'", cmd.replace('\'', "'\\''"));
        if let Ok(out) = self.exec(&non_interactive).await {
            return Ok(out);
        }

        let Some(password) = password else {
            return Err(DeploymentError::AuthError {
                user: self.user().to_string(),
                host: self.host().to_string(),
                reason: "sudo requires a password and none was supplied".to_string(),
            });
        };

        let encoded_password = base64::engine::general_purpose::STANDARD.encode(password);
        let interactive = format!(
            "echo '{encoded_password}' | base64 -d | sudo -S bash -c '{}'",
            cmd.replace('\'', "'\\''")
        );

        self.exec(&interactive).await
    }

    /// Creates `link -> target` atomically: write to a temp name, then
    /// rename over the old link in one filesystem operation.
    pub async fn atomic_symlink(&self, target: &str, link: &str) -> Result<(), DeploymentError> {
        let tmp = format!("{link}.tmp");
        self.exec(&format!(
            "ln -sfn {} {} && mv -Tf {} {}",
            shell_quote(target),
            shell_quote(&tmp),
            shell_quote(&tmp),
            shell_quote(link),
        ))
        .await?;
        Ok(())
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
