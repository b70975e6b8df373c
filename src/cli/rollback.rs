use anyhow::Result;

use crate::cli::APP_NAME;
use fleetcrate::config::DeploymentConfig;
use fleetcrate::coordinator::Coordinator;
use crate::output;

pub async fn run(config: &DeploymentConfig, reference: &str) -> Result<()> {
    output::header(&format!("Rolling back {}", config.deployment_id));

    let spinner = output::create_spinner(&format!("Swapping to {reference}..."));
    let coordinator = Coordinator::new(APP_NAME);
    let version_id = coordinator.rollback(config, reference).await?;
    spinner.finish_and_clear();

    output::success(&format!("Rolled back to version {version_id}"));
    Ok(())
}
