use anyhow::Result;

use crate::cli::APP_NAME;
use fleetcrate::config::DeploymentConfig;
use fleetcrate::coordinator::Coordinator;
use crate::output;

pub async fn run(config: &DeploymentConfig) -> Result<()> {
    let coordinator = Coordinator::new(APP_NAME);
    let status = coordinator.status(config).await?;

    output::header(&format!("Status for {}", config.deployment_id));
    println!("  state:          {:?}", status.container.state);
    println!(
        "  active version: {}",
        status.active_version.as_deref().unwrap_or("<none>")
    );
    println!(
        "  image digest:   {}",
        status.container.image_digest.as_deref().unwrap_or("<none>")
    );
    println!("  uptime:         {}s", status.container.uptime_seconds);
    println!("  restarts:       {}", status.container.restarts);
    println!(
        "  last backup:    {}",
        status.last_backup.as_deref().unwrap_or("<none>")
    );

    if !status.container.recent_error_lines.trim().is_empty() {
        output::warning("recent stderr:");
        println!("{}", status.container.recent_error_lines);
    }

    Ok(())
}
