use anyhow::Result;
use dialoguer::Confirm;

use crate::cli::APP_NAME;
use fleetcrate::config::DeploymentConfig;
use fleetcrate::coordinator::Coordinator;
use crate::output;

pub async fn run(config: &DeploymentConfig, remove_data: bool) -> Result<()> {
    if remove_data {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "This will permanently delete backups and data directories for '{}'. Continue?",
                config.deployment_id
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            output::info("Aborted");
            return Ok(());
        }
    }

    output::header(&format!("Tearing down {}", config.deployment_id));

    let coordinator = Coordinator::new(APP_NAME);
    coordinator.down(config, remove_data).await?;

    output::success("Deployment stopped");
    Ok(())
}
