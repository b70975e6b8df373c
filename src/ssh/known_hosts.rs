use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use fs2::FileExt;
use tracing::info;

use crate::error::DeploymentError;

/// Process-wide owner of `~/.<app>/known_hosts`. Pins a host's fingerprint on
/// first contact; any later mismatch is an `AuthError` raised before any
/// remote command runs. Writes are append-only under a file lock.
pub struct KnownHostsStore {
    path: PathBuf,
}

impl KnownHostsStore {
    pub fn new(app_home: &Path) -> Self {
        Self {
            path: app_home.join("known_hosts"),
        }
    }

    pub fn verify_or_pin(&self, host: &str, port: u16) -> Result<(), DeploymentError> {
        let fingerprint = scan_fingerprint(host, port)?;
        self.verify_or_pin_fingerprint(host, &fingerprint)
    }

    fn verify_or_pin_fingerprint(
        &self,
        host: &str,
        fingerprint: &str,
    ) -> Result<(), DeploymentError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| DeploymentError::ConfigInvalid(format!(
                "failed to create known_hosts directory: {e}"
            )))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| DeploymentError::ConfigInvalid(format!(
                "failed to open known_hosts file {}: {e}",
                self.path.display()
            )))?;

        file.lock_exclusive().map_err(|e| DeploymentError::ConfigInvalid(format!(
            "failed to lock known_hosts file: {e}"
        )))?;

        let existing = existing_entries(&self.path);

        let result = match existing.iter().find(|(h, _)| h == host) {
            Some((_, known_fp)) if known_fp == fingerprint => Ok(()),
            Some((_, known_fp)) => Err(DeploymentError::AuthError {
                user: String::new(),
                host: host.to_string(),
                reason: format!(
                    "host key fingerprint changed (known: {known_fp}, presented: {fingerprint})"
                ),
            }),
            None => {
                let mut f = &file;
                writeln!(f, "{host} {fingerprint}").map_err(|e| DeploymentError::ConfigInvalid(format!(
                    "failed to write known_hosts entry: {e}"
                )))?;
                info!("pinned new host key fingerprint for {}", host);
                Ok(())
            }
        };

        let _ = file.unlock();
        result
    }

    #[cfg(test)]
    pub fn verify_or_pin_for_test(
        &self,
        host: &str,
        fingerprint: &str,
    ) -> Result<(), DeploymentError> {
        self.verify_or_pin_fingerprint(host, fingerprint)
    }
}

fn existing_entries(path: &Path) -> Vec<(String, String)> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, ' ');
            let host = parts.next()?.to_string();
            let fp = parts.next()?.to_string();
            Some((host, fp))
        })
        .collect()
}

fn scan_fingerprint(host: &str, port: u16) -> Result<String, DeploymentError> {
    let output = Command::new("ssh-keyscan")
        .args(["-p", &port.to_string(), host])
        .output()
        .map_err(|e| DeploymentError::NetworkError {
            host: host.to_string(),
            reason: format!("failed to run ssh-keyscan: {e}"),
        })?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(DeploymentError::NetworkError {
            host: host.to_string(),
            reason: "ssh-keyscan produced no host key".to_string(),
        });
    }

    // Collapse to a single deterministic line: keyscan may return several
    // key types. We keep the first, which is stable for a given host config.
    let first_line = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();

    Ok(first_line)
}
