use anyhow::Result;

use crate::cli::APP_NAME;
use fleetcrate::config::DeploymentConfig;
use fleetcrate::coordinator::Coordinator;
use crate::output;

pub async fn run(config: &DeploymentConfig) -> Result<()> {
    output::header(&format!("Updating {}", config.deployment_id));

    let spinner = output::create_spinner("Backing up, building, and swapping...");
    let coordinator = Coordinator::new(APP_NAME);
    let result = coordinator.update(config).await;
    spinner.finish_and_clear();

    match result {
        Ok(version_id) => {
            output::success(&format!("Swapped to version {version_id}"));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
