use anyhow::Result;

use crate::cli::APP_NAME;
use fleetcrate::config::DeploymentConfig;
use fleetcrate::coordinator::Coordinator;
use crate::output;

pub async fn run(config: &DeploymentConfig) -> Result<()> {
    output::header(&format!("Starting {}", config.deployment_id));

    let spinner = output::create_spinner("Rendering, building, and starting...");
    let coordinator = Coordinator::new(APP_NAME);
    let version_id = coordinator.up(config).await?;
    spinner.finish_and_clear();

    output::success(&format!("Started version {version_id}"));
    Ok(())
}
