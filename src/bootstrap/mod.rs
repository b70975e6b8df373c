use tracing::{debug, info};

use crate::config::RuntimeRequirement;
use crate::error::DeploymentError;
use crate::os::PackageManager;
use crate::ssh::Session;

/// State of a single checked prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Present(String),
    Absent,
    TooOld(String),
}

#[derive(Debug, Clone)]
pub struct Probe {
    pub name: String,
    pub state: ProbeState,
}

/// Result of `ensure_prerequisites`: one entry per dependency probed, in
/// probe order.
#[derive(Debug, Clone, Default)]
pub struct PrerequisiteReport {
    pub probes: Vec<Probe>,
}

impl PrerequisiteReport {
    fn record(&mut self, name: &str, state: ProbeState) {
        self.probes.push(Probe {
            name: name.to_string(),
            state,
        });
    }
}

const COMPOSE_PLUGIN_MIN_VERSION: &str = "2.0";
const DOCKER_MIN_VERSION: &str = "20.10";

/// Host Bootstrapper (C2): brings a host up to the point where it can run
/// the Container Lifecycle Manager's operations. Probes in a fixed order,
/// installing only what's missing, and re-probes after every install.
pub async fn ensure_prerequisites(
    session: &dyn Session,
    runtime_req: &RuntimeRequirement,
    sudo_password: Option<&str>,
) -> Result<PrerequisiteReport, DeploymentError> {
    let mut report = PrerequisiteReport::default();

    ensure_shell_basics(session, &mut report).await?;

    let pm = PackageManager::detect(session).await?;

    ensure_runtime(session, &pm, runtime_req, sudo_password, &mut report).await?;
    ensure_container_daemon(session, &pm, sudo_password, &mut report).await?;
    ensure_compose_tool(session, &pm, sudo_password, &mut report).await?;

    Ok(report)
}

async fn ensure_shell_basics(
    session: &dyn Session,
    report: &mut PrerequisiteReport,
) -> Result<(), DeploymentError> {
    for tool in ["sh", "uname", "id"] {
        if !session.exec_ok(&format!("command -v {tool}")).await? {
            return Err(DeploymentError::UnsupportedHostError {
                distro_id: "unknown".to_string(),
                hint: format!("required shell tool '{tool}' is missing"),
            });
        }
    }
    report.record("shell-basics", ProbeState::Present(String::new()));
    Ok(())
}

async fn ensure_runtime(
    session: &dyn Session,
    pm: &PackageManager,
    runtime_req: &RuntimeRequirement,
    sudo_password: Option<&str>,
    report: &mut PrerequisiteReport,
) -> Result<(), DeploymentError> {
    let state = probe_version(pm, session, &runtime_req.name, Some(&runtime_req.min_version)).await?;

    if matches!(state, ProbeState::Present(_)) {
        report.record(&runtime_req.name, state);
        return Ok(());
    }

    info!(
        "installing {} (need >= {})",
        runtime_req.name, runtime_req.min_version
    );
    pm.install(session, &runtime_req.name, sudo_password).await?;

    let reprobed = probe_version(pm, session, &runtime_req.name, Some(&runtime_req.min_version)).await?;
    if !matches!(reprobed, ProbeState::Present(_)) {
        return Err(DeploymentError::InstallVerificationError {
            dependency: runtime_req.name.clone(),
            detail: "still absent or too old after install".to_string(),
        });
    }

    report.record(&runtime_req.name, reprobed);
    Ok(())
}

async fn ensure_container_daemon(
    session: &dyn Session,
    pm: &PackageManager,
    sudo_password: Option<&str>,
    report: &mut PrerequisiteReport,
) -> Result<(), DeploymentError> {
    let present = pm.verify(session, "docker", Some(DOCKER_MIN_VERSION)).await?;

    if present.is_none() {
        info!("installing container runtime");
        pm.install(session, "docker.io", sudo_password).await?;
    }

    let running = session.exec_ok("docker info >/dev/null 2>&1").await?;
    if !running {
        debug!("container daemon present but stopped, starting");
        session
            .sudo_exec_with_password(
                "systemctl enable --now docker || service docker start",
                sudo_password,
            )
            .await?;
    }

    let version = pm.verify(session, "docker", Some(DOCKER_MIN_VERSION)).await?;
    match version {
        Some(v) => {
            report.record("container-daemon", ProbeState::Present(v));
            Ok(())
        }
        None => Err(DeploymentError::InstallVerificationError {
            dependency: "docker".to_string(),
            detail: "container daemon did not become available after install".to_string(),
        }),
    }
}

async fn ensure_compose_tool(
    session: &dyn Session,
    pm: &PackageManager,
    sudo_password: Option<&str>,
    report: &mut PrerequisiteReport,
) -> Result<(), DeploymentError> {
    let plugin_ok = session.exec_ok("docker compose version >/dev/null 2>&1").await?;
    if plugin_ok {
        report.record("compose", ProbeState::Present("plugin".to_string()));
        return Ok(());
    }

    let standalone = pm
        .verify(session, "docker-compose", Some(COMPOSE_PLUGIN_MIN_VERSION))
        .await?;
    if let Some(v) = standalone {
        report.record("compose", ProbeState::Present(v));
        return Ok(());
    }

    info!("installing compose tool");
    if pm
        .install(session, "docker-compose-plugin", sudo_password)
        .await
        .is_err()
    {
        pm.install(session, "docker-compose", sudo_password).await?;
    }

    let plugin_ok = session.exec_ok("docker compose version >/dev/null 2>&1").await?;
    if plugin_ok {
        report.record("compose", ProbeState::Present("plugin".to_string()));
        return Ok(());
    }

    let standalone = pm
        .verify(session, "docker-compose", Some(COMPOSE_PLUGIN_MIN_VERSION))
        .await?;
    match standalone {
        Some(v) => {
            report.record("compose", ProbeState::Present(v));
            Ok(())
        }
        None => Err(DeploymentError::InstallVerificationError {
            dependency: "compose".to_string(),
            detail: "neither the docker compose plugin nor a standalone binary is available"
                .to_string(),
        }),
    }
}

async fn probe_version(
    pm: &PackageManager,
    session: &dyn Session,
    name: &str,
    min_version: Option<&str>,
) -> Result<ProbeState, DeploymentError> {
    match pm.verify(session, name, min_version).await {
        Ok(Some(v)) => Ok(ProbeState::Present(v)),
        Ok(None) => Ok(ProbeState::Absent),
        Err(DeploymentError::InstallVerificationError { detail, .. }) => {
            Ok(ProbeState::TooOld(detail))
        }
        Err(e) => Err(e),
    }
}
