use anyhow::Result;

use crate::cli::APP_NAME;
use fleetcrate::config::DeploymentConfig;
use fleetcrate::coordinator::Coordinator;
use crate::output;

pub async fn run(config: &DeploymentConfig, sudo_password: Option<&str>) -> Result<()> {
    output::header(&format!("Bootstrapping {}", config.deployment_id));

    let spinner = output::create_spinner("Connecting and checking prerequisites...");
    let coordinator = Coordinator::new(APP_NAME);
    coordinator.init(config, sudo_password).await?;
    spinner.finish_and_clear();

    output::success(&format!("{} is ready", config.host));
    Ok(())
}
