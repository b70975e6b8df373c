use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod bootstrap;
pub mod down;
pub mod init;
pub mod rollback;
pub mod secrets_cmd;
pub mod status;
pub mod up;
pub mod update;

pub const APP_NAME: &str = "fleetcrate";

#[derive(Parser)]
#[command(name = "fleetcrate", version, about = "Deploy long-running worker processes to remote hosts")]
pub struct Cli {
    /// Path to the deployment config file
    #[arg(short, long, default_value = "deployment.toml")]
    pub config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scaffold deployment.toml in the current directory
    Init,

    /// Bootstrap prerequisites on the target host and create its layout
    Bootstrap {
        /// Password for sudo on the remote host, if required
        #[arg(long)]
        sudo_password: Option<String>,
    },

    /// Cold-start the application: render, build, materialize secrets, start
    Up,

    /// Roll out a new version with a pre-update backup and health-gated swap
    Update,

    /// Roll back to a previous version
    Rollback {
        /// Version id, or "previous"/"current" (default: previous)
        #[arg(default_value = "previous")]
        reference: String,
    },

    /// Show the current container and version status
    Status,

    /// Stop the container and tear down the deployment
    Down {
        /// Also delete backups and data directories on the host
        #[arg(long)]
        remove_data: bool,
    },

    /// Manage encrypted secrets in the local vault
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },
}

#[derive(Subcommand)]
pub enum SecretsAction {
    /// Set a secret (KEY=VALUE)
    Set {
        /// KEY=VALUE pair
        pair: String,
    },
    /// Remove a secret
    Remove {
        /// Secret name
        name: String,
    },
    /// Show a secret's value
    Get {
        /// Secret name
        name: String,
    },
    /// List secret names (values are never printed)
    List,
}
