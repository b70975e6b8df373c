use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::container::ContainerManager;
use crate::error::DeploymentError;
use crate::layout::RemoteLayout;
use crate::ssh::Session;

const ARCHIVE_NAME: &str = "archive.tar.gz";
const DEFAULT_QUIESCE_GRACE: Duration = Duration::from_secs(30);

/// One snapshot of host-side deployment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub timestamp: String,
    pub includes_data: bool,
    pub source_version_id: String,
    pub size_bytes: u64,
    pub unsafe_hot: bool,
}

/// Backup Store (C6). Archives are built on the host with `tar`+`gzip`
/// (see DESIGN.md for why `.tar.gz` over `.tar.zst`).
pub struct BackupStore<'a> {
    session: &'a dyn Session,
    layout: &'a RemoteLayout<'a>,
}

impl<'a> BackupStore<'a> {
    pub fn new(session: &'a dyn Session, layout: &'a RemoteLayout<'a>) -> Self {
        Self { session, layout }
    }

    /// Quiesces the container, archives `current/`, `state.json`, the vault
    /// ciphertext, and (if `include_data`) the configured data directories,
    /// then restarts the container.
    pub async fn create(
        &self,
        include_data: bool,
        data_dirs: &[String],
        vault_path_on_host: Option<&str>,
        allow_unsafe_hot: bool,
    ) -> Result<BackupRecord, DeploymentError> {
        let state = self.layout.read_state().await?;
        let source_version_id = state.active_version.clone().unwrap_or_default();

        let quiesced = self.quiesce(DEFAULT_QUIESCE_GRACE).await;

        let unsafe_hot = match quiesced {
            Ok(()) => false,
            Err(e) if allow_unsafe_hot => {
                warn!("proceeding with a hot backup: {e}");
                true
            }
            Err(e) => return Err(e),
        };

        let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let backup_dir = self.layout.backup_dir(&timestamp);
        self.session.exec(&format!("mkdir -p {backup_dir}")).await?;

        let mut archive_inputs = vec![
            "current".to_string(),
            "state.json".to_string(),
        ];
        if let Some(vault_path) = vault_path_on_host {
            archive_inputs.push(vault_path.to_string());
        }
        if include_data {
            archive_inputs.extend(data_dirs.iter().cloned());
        }

        let archive_path = format!("{backup_dir}/{ARCHIVE_NAME}");
        self.session
            .exec(&format!(
                "cd {} && tar -czhf {archive_path} {}",
                self.layout.root(),
                archive_inputs.join(" ")
            ))
            .await?;

        if !unsafe_hot {
            let current = self.layout.current();
            let _ = self
                .session
                .exec(&format!("cd {current} && docker compose up -d"))
                .await;
        }

        let size_bytes: u64 = self
            .session
            .exec(&format!("stat -c%s {archive_path}"))
            .await
            .unwrap_or_default()
            .trim()
            .parse()
            .unwrap_or(0);

        let record = BackupRecord {
            timestamp: timestamp.clone(),
            includes_data: include_data,
            source_version_id,
            size_bytes,
            unsafe_hot,
        };

        let record_path = format!("{backup_dir}/record.json");
        let json = serde_json::to_vec_pretty(&record).expect("BackupRecord always serializes");
        self.session.upload(&json, &record_path, 0o644).await?;

        info!("created backup {timestamp} ({size_bytes} bytes)");
        Ok(record)
    }

    /// Rebinds `current/` to the version extracted from `backup_timestamp`'s
    /// archive. On any failure mid-restore, the prior `current/` target is
    /// reinstated via a one-slot undo pointer kept alongside the archive.
    pub async fn restore(&self, backup_timestamp: &str) -> Result<(), DeploymentError> {
        let backup_dir = self.layout.backup_dir(backup_timestamp);
        let archive_path = format!("{backup_dir}/{ARCHIVE_NAME}");

        if !self.session.exists(&archive_path).await? {
            return Err(DeploymentError::DeploymentInconsistent {
                deployment_id: self.layout.root().to_string(),
                detail: format!("no backup archive found at {archive_path}"),
            });
        }

        let undo_pointer = self
            .session
            .exec(&format!("readlink -f {}", self.layout.current()))
            .await
            .ok();

        let container = ContainerManager::new(self.session, self.layout);
        let _ = container.stop(DEFAULT_QUIESCE_GRACE).await;

        let staging = format!("{backup_dir}/restore-staging");
        let result = async {
            self.session.exec(&format!("rm -rf {staging} && mkdir -p {staging}")).await?;
            self.session
                .exec(&format!("tar -xzf {archive_path} -C {staging}"))
                .await?;
            self.session
                .atomic_symlink(&format!("{staging}/current"), &self.layout.current())
                .await?;
            self.session
                .exec(&format!(
                    "cp {staging}/state.json {}",
                    self.layout.state_file()
                ))
                .await?;
            Ok::<(), DeploymentError>(())
        }
        .await;

        if let Err(e) = result {
            if let Some(previous) = undo_pointer {
                let _ = self
                    .session
                    .atomic_symlink(previous.trim(), &self.layout.current())
                    .await;
            }
            return Err(e);
        }

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<BackupRecord>, DeploymentError> {
        let root = self.layout.backups_root();
        if !self.session.exists(&root).await? {
            return Ok(Vec::new());
        }

        let listing = self
            .session
            .exec(&format!("ls -1 {root} 2>/dev/null || true"))
            .await?;

        let mut records = Vec::new();
        for ts in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let record_path = format!("{}/record.json", self.layout.backup_dir(ts));
            if !self.session.exists(&record_path).await? {
                continue;
            }
            let bytes = self.session.download(&record_path).await?;
            if let Ok(record) = serde_json::from_slice::<BackupRecord>(&bytes) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Prunes backups beyond `max_count` AND older than `max_age_days`,
    /// always keeping the most recent backup per distinct source version.
    pub async fn apply_retention(
        &self,
        max_count: usize,
        max_age_days: u32,
    ) -> Result<(), DeploymentError> {
        let records = self.list().await?;
        if records.len() <= max_count {
            return Ok(());
        }

        let mut seen_versions = std::collections::HashSet::new();

        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);

        for (idx, record) in records.iter().enumerate() {
            let is_newest_for_its_version = seen_versions.insert(record.source_version_id.clone());
            let keep_for_count = idx < max_count;
            let keep_for_age = chrono::NaiveDateTime::parse_from_str(&record.timestamp, "%Y%m%dT%H%M%SZ")
                .map(|naive| naive.and_utc() >= cutoff)
                .unwrap_or(true);

            if is_newest_for_its_version || keep_for_count || keep_for_age {
                continue;
            }

            let dir = self.layout.backup_dir(&record.timestamp);
            self.session.exec(&format!("rm -rf {dir}")).await?;
        }

        Ok(())
    }

    pub async fn download(&self, backup_timestamp: &str, local_path: &std::path::Path) -> Result<(), DeploymentError> {
        let remote = format!("{}/{ARCHIVE_NAME}", self.layout.backup_dir(backup_timestamp));
        let bytes = self.session.download(&remote).await?;
        std::fs::write(local_path, bytes).map_err(|e| {
            DeploymentError::ConfigInvalid(format!("failed to write {}: {e}", local_path.display()))
        })
    }

    /// Stops the container and waits up to `grace` for a clean exit.
    /// `BackupNotQuiesced` if it's still running afterward.
    async fn quiesce(&self, grace: Duration) -> Result<(), DeploymentError> {
        let container = ContainerManager::new(self.session, self.layout);
        container.stop(grace).await?;

        let current = self.layout.current();
        let still_running = self
            .session
            .exec_ok(&format!(
                "cd {current} && [ \"$(docker compose ps -q --status running | wc -l)\" -gt 0 ]"
            ))
            .await
            .unwrap_or(false);

        if still_running {
            return Err(DeploymentError::BackupNotQuiesced {
                grace_secs: grace.as_secs(),
            });
        }

        Ok(())
    }
}
