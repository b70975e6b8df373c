use std::time::Duration;

use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::backup::{BackupRecord, BackupStore};
use crate::bootstrap;
use crate::config::DeploymentConfig;
use crate::container::{self, ContainerManager, StatusReport, SwapStrategy};
use crate::error::DeploymentError;
use crate::layout::{ContainerState, RemoteLayout, StateFile};
use crate::renderer;
use crate::secrets::Vault;
use crate::ssh::{KnownHostsStore, RemoteSession};
use crate::version::{VersionRef, VersionStore};

/// Aggregated view returned by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub container: StatusReport,
    pub active_version: Option<String>,
    pub last_backup: Option<String>,
}

/// Deployment Coordinator (C8): the top-level orchestrator composing
/// C1-C7 for the six operations below. Every operation acquires the
/// deployment-scoped host lock before any mutation and runs its pre-flight
/// checks before touching anything.
pub struct Coordinator {
    app_name: String,
}

impl Coordinator {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    async fn connect(&self, config: &DeploymentConfig) -> Result<RemoteSession, DeploymentError> {
        let home = crate::ssh::app_home(&self.app_name)?;
        let known_hosts = KnownHostsStore::new(&home);
        RemoteSession::connect(config, &known_hosts).await
    }

    fn layout<'a>(&self, session: &'a RemoteSession, home: &str, config: &DeploymentConfig) -> RemoteLayout<'a> {
        RemoteLayout::new(session, home, &config.deployment_id)
    }

    /// Opens a session, runs the Bootstrapper, creates the RemoteLayout,
    /// verifies its invariants, writes an empty `state.json`. Idempotent:
    /// running twice against a fully-provisioned host performs only probes.
    pub async fn init(
        &self,
        config: &DeploymentConfig,
        sudo_password: Option<&str>,
    ) -> Result<(), DeploymentError> {
        let span = info_span!("init", deployment_id = %config.deployment_id, host = %config.host);
        async {
            info!("starting init");
            let session = self.connect(config).await?;
            bootstrap::ensure_prerequisites(&session, &config.runtime, sudo_password).await?;

            let home = crate::ssh::app_home(&self.app_name)?;
            let layout = self.layout(&session, home.to_string_lossy().as_ref(), config);
            layout.ensure_created().await?;
            layout.verify_invariants().await?;

            info!("init complete");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Renders a bundle, builds it, uploads it, records a VersionRecord,
    /// materializes secrets, starts the container, updates `state.json`.
    pub async fn up(&self, config: &DeploymentConfig) -> Result<String, DeploymentError> {
        let span = info_span!("up", deployment_id = %config.deployment_id, host = %config.host);
        async {
            info!("starting up");
            let session = self.connect(config).await?;
            let home = crate::ssh::app_home(&self.app_name)?;
            let layout = self.layout(&session, home.to_string_lossy().as_ref(), config);

            let lock = layout.acquire_lock().await?;
            let result = self.up_locked(config, &session, &layout).await;
            lock.release().await?;

            match &result {
                Ok(id) => info!(version = %id, "up complete"),
                Err(e) => info!(error = %e, "up failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn up_locked(
        &self,
        config: &DeploymentConfig,
        session: &RemoteSession,
        layout: &RemoteLayout<'_>,
    ) -> Result<String, DeploymentError> {
        let config_hash = config.config_hash();
        let container = ContainerManager::new(session, layout);
        let versions = VersionStore::new(session, layout);

        let state = layout.read_state().await?;
        if let Some(active_id) = state.active_version.clone() {
            let already_current = versions
                .resolve(&VersionRef::Id(active_id.clone()))
                .await
                .map(|record| record.config_hash == config_hash)
                .unwrap_or(false);

            if already_current && container.is_running_with_config_hash(&config_hash).await? {
                info!(version = %active_id, "up is a no-op, already running with matching config");
                return Ok(active_id);
            }
        }

        let key = crate::secrets::key::load_or_generate(&self.app_name)?;
        let vault = Vault::open(&self.app_name, &config.deployment_id, key)?;
        for name in &config.secrets_required {
            vault.get(name)?;
        }

        let version_id = VersionStore::next_id();
        let bundle = renderer::render(config, &version_id)?;

        let version_dir = layout.version_dir(&version_id);
        session.exec(&format!("mkdir -p {version_dir}")).await?;
        for (name, contents) in bundle.files() {
            session
                .write_text_file(&format!("{version_dir}/{name}"), contents)
                .await?;
        }

        let image_digest = container.build(&version_id).await?;

        versions
            .record(&version_id, &image_digest, &config_hash, None)
            .await?;

        vault
            .materialize(session, &layout.secrets_env(), &config.secrets_required)
            .await?;

        // `current/` is only advanced once `swap` has confirmed the new
        // version is healthy; on failure it reverts and the old target
        // (absent on a true cold start) is left in place.
        container
            .swap(&version_id, SwapStrategy::InPlace, container::default_health_deadline())
            .await?;

        layout
            .write_state(&StateFile {
                active_version: Some(version_id.clone()),
                last_backup: state.last_backup,
                container_state: ContainerState::Running,
                format_version: crate::layout::CURRENT_FORMAT_VERSION,
            })
            .await?;

        versions
            .apply_retention(config.retention.max_count, config.retention.max_age_days)
            .await?;

        Ok(version_id)
    }

    /// Equivalent to `up` but performs a pre-update backup and swaps rather
    /// than cold-starting. Auto-rolls back to the previous version on
    /// `StartupTimeout`.
    pub async fn update(&self, config: &DeploymentConfig) -> Result<String, DeploymentError> {
        let span = info_span!("update", deployment_id = %config.deployment_id, host = %config.host);
        async {
            info!("starting update");
            let session = self.connect(config).await?;
            let home = crate::ssh::app_home(&self.app_name)?;
            let layout = self.layout(&session, home.to_string_lossy().as_ref(), config);

            let lock = layout.acquire_lock().await?;
            let result = self.update_locked(config, &session, &layout).await;
            lock.release().await?;
            result
        }
        .instrument(span)
        .await
    }

    async fn update_locked(
        &self,
        config: &DeploymentConfig,
        session: &RemoteSession,
        layout: &RemoteLayout<'_>,
    ) -> Result<String, DeploymentError> {
        let state = layout.read_state().await?;
        let previous_version = state.active_version.clone();

        let backups = BackupStore::new(session, layout);
        backups
            .create(false, &config.data_dirs, Some(&layout.secrets_env()), false)
            .await?;
        backups
            .apply_retention(config.retention.max_count, config.retention.max_age_days)
            .await?;

        let key = crate::secrets::key::load_or_generate(&self.app_name)?;
        let vault = Vault::open(&self.app_name, &config.deployment_id, key)?;
        for name in &config.secrets_required {
            vault.get(name)?;
        }

        let config_hash = config.config_hash();
        let version_id = VersionStore::next_id();
        let bundle = renderer::render(config, &version_id)?;

        let version_dir = layout.version_dir(&version_id);
        session.exec(&format!("mkdir -p {version_dir}")).await?;
        for (name, contents) in bundle.files() {
            session
                .write_text_file(&format!("{version_dir}/{name}"), contents)
                .await?;
        }

        let container = ContainerManager::new(session, layout);
        let image_digest = container.build(&version_id).await?;

        let versions = VersionStore::new(session, layout);
        versions
            .record(&version_id, &image_digest, &config_hash, None)
            .await?;

        vault
            .materialize(session, &layout.secrets_env(), &config.secrets_required)
            .await?;

        let swap_result = container
            .swap(&version_id, SwapStrategy::InPlace, container::default_health_deadline())
            .await;

        if let Err(original_error) = swap_result {
            let rollback_outcome = match &previous_version {
                Some(prev) => container
                    .swap(prev, SwapStrategy::InPlace, container::default_health_deadline())
                    .await,
                None => Err(DeploymentError::NoPreviousVersion {
                    deployment_id: config.deployment_id.clone(),
                }),
            };

            let auto_rollback_succeeded = rollback_outcome.is_ok();
            layout
                .write_state(&StateFile {
                    active_version: if auto_rollback_succeeded {
                        previous_version
                    } else {
                        state.active_version
                    },
                    last_backup: state.last_backup,
                    container_state: if auto_rollback_succeeded {
                        ContainerState::Running
                    } else {
                        ContainerState::Inconsistent
                    },
                    format_version: crate::layout::CURRENT_FORMAT_VERSION,
                })
                .await?;

            return Err(DeploymentError::UpdateFailed {
                original: Box::new(original_error),
                auto_rollback_succeeded,
            });
        }

        layout
            .write_state(&StateFile {
                active_version: Some(version_id.clone()),
                last_backup: state.last_backup,
                container_state: ContainerState::Running,
                format_version: crate::layout::CURRENT_FORMAT_VERSION,
            })
            .await?;

        versions
            .apply_retention(config.retention.max_count, config.retention.max_age_days)
            .await?;

        Ok(version_id)
    }

    /// Resolves `reference` via the Version Store and swaps to it.
    pub async fn rollback(&self, config: &DeploymentConfig, reference: &str) -> Result<String, DeploymentError> {
        let span = info_span!("rollback", deployment_id = %config.deployment_id, host = %config.host);
        async {
            let session = self.connect(config).await?;
            let home = crate::ssh::app_home(&self.app_name)?;
            let layout = self.layout(&session, home.to_string_lossy().as_ref(), config);

            let lock = layout.acquire_lock().await?;
            let result = self.rollback_locked(&session, &layout, reference).await;
            lock.release().await?;
            result
        }
        .instrument(span)
        .await
    }

    async fn rollback_locked(
        &self,
        session: &RemoteSession,
        layout: &RemoteLayout<'_>,
        reference: &str,
    ) -> Result<String, DeploymentError> {
        let versions = VersionStore::new(session, layout);
        let target = versions.resolve(&VersionRef::parse(reference)).await?;

        let container = ContainerManager::new(session, layout);
        container
            .swap(&target.id, SwapStrategy::InPlace, container::default_health_deadline())
            .await?;

        let state = layout.read_state().await?;
        layout
            .write_state(&StateFile {
                active_version: Some(target.id.clone()),
                last_backup: state.last_backup,
                container_state: ContainerState::Running,
                format_version: crate::layout::CURRENT_FORMAT_VERSION,
            })
            .await?;

        Ok(target.id)
    }

    pub async fn status(&self, config: &DeploymentConfig) -> Result<DeploymentStatus, DeploymentError> {
        let session = self.connect(config).await?;
        let home = crate::ssh::app_home(&self.app_name)?;
        let layout = self.layout(&session, home.to_string_lossy().as_ref(), config);

        let container = ContainerManager::new(&session, &layout);
        let container_status = container.status().await?;
        let state = layout.read_state().await?;

        Ok(DeploymentStatus {
            container: container_status,
            active_version: state.active_version,
            last_backup: state.last_backup,
        })
    }

    /// Stops the container, removes `current/`, and — if `remove_data` —
    /// deletes the entire RemoteLayout including backups and data
    /// directories. Never touches the local vault.
    pub async fn down(&self, config: &DeploymentConfig, remove_data: bool) -> Result<(), DeploymentError> {
        let span = info_span!("down", deployment_id = %config.deployment_id, host = %config.host);
        async {
            let session = self.connect(config).await?;
            let home = crate::ssh::app_home(&self.app_name)?;
            let layout = self.layout(&session, home.to_string_lossy().as_ref(), config);

            let lock = layout.acquire_lock().await?;
            let result = self.down_locked(&session, &layout, remove_data).await;
            lock.release().await?;
            result
        }
        .instrument(span)
        .await
    }

    async fn down_locked(
        &self,
        session: &RemoteSession,
        layout: &RemoteLayout<'_>,
        remove_data: bool,
    ) -> Result<(), DeploymentError> {
        let container = ContainerManager::new(session, layout);
        let _ = container.stop(Duration::from_secs(30)).await;
        session.exec(&format!("rm -rf {}", layout.current())).await?;

        if remove_data {
            session.exec(&format!("rm -rf {}", layout.root())).await?;
        } else {
            let last_backup = layout.read_state().await?.last_backup;
            layout
                .write_state(&StateFile {
                    active_version: None,
                    last_backup,
                    container_state: ContainerState::Absent,
                    format_version: crate::layout::CURRENT_FORMAT_VERSION,
                })
                .await?;
        }

        Ok(())
    }

    /// Lists known backups for the deployment.
    pub async fn list_backups(&self, config: &DeploymentConfig) -> Result<Vec<BackupRecord>, DeploymentError> {
        let session = self.connect(config).await?;
        let home = crate::ssh::app_home(&self.app_name)?;
        let layout = self.layout(&session, home.to_string_lossy().as_ref(), config);
        BackupStore::new(&session, &layout).list().await
    }
}
