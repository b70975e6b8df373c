mod cli;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, SecretsAction};
use fleetcrate::config::DeploymentConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .without_time()
        .init();

    match cli.command {
        Command::Init => {
            cli::init::run(&cli.config)?;
        }

        Command::Bootstrap { sudo_password } => {
            let config = DeploymentConfig::load(&cli.config)?;
            cli::bootstrap::run(&config, sudo_password.as_deref()).await?;
        }

        Command::Up => {
            let config = DeploymentConfig::load(&cli.config)?;
            cli::up::run(&config).await?;
        }

        Command::Update => {
            let config = DeploymentConfig::load(&cli.config)?;
            cli::update::run(&config).await?;
        }

        Command::Rollback { reference } => {
            let config = DeploymentConfig::load(&cli.config)?;
            cli::rollback::run(&config, &reference).await?;
        }

        Command::Status => {
            let config = DeploymentConfig::load(&cli.config)?;
            cli::status::run(&config).await?;
        }

        Command::Down { remove_data } => {
            let config = DeploymentConfig::load(&cli.config)?;
            cli::down::run(&config, remove_data).await?;
        }

        Command::Secrets { action } => {
            let config = DeploymentConfig::load(&cli.config)?;
            match action {
                SecretsAction::Set { pair } => cli::secrets_cmd::set(&config, &pair)?,
                SecretsAction::Remove { name } => cli::secrets_cmd::remove(&config, &name)?,
                SecretsAction::Get { name } => cli::secrets_cmd::get(&config, &name)?,
                SecretsAction::List => cli::secrets_cmd::list(&config)?,
            }
        }
    }

    Ok(())
}
