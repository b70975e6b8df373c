use anyhow::{Context, Result};

use crate::cli::APP_NAME;
use fleetcrate::config::DeploymentConfig;
use crate::output;
use fleetcrate::secrets::{key, Vault};

fn open_vault(config: &DeploymentConfig) -> Result<Vault> {
    let vault_key = key::load_or_generate(APP_NAME)?;
    Ok(Vault::open(APP_NAME, &config.deployment_id, vault_key)?)
}

pub fn set(config: &DeploymentConfig, pair: &str) -> Result<()> {
    let (name, value) = pair
        .split_once('=')
        .context("expected KEY=VALUE format")?;

    let vault = open_vault(config)?;
    vault.set(name.trim(), value.trim().as_bytes())?;

    output::success(&format!("Set secret '{}'", name.trim()));
    Ok(())
}

pub fn remove(config: &DeploymentConfig, name: &str) -> Result<()> {
    let vault = open_vault(config)?;
    vault.remove(name)?;

    output::success(&format!("Removed secret '{name}'"));
    Ok(())
}

pub fn get(config: &DeploymentConfig, name: &str) -> Result<()> {
    let vault = open_vault(config)?;
    let value = vault.get(name)?;
    println!("{}", String::from_utf8_lossy(&value));
    Ok(())
}

pub fn list(config: &DeploymentConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let names = vault.list()?;

    if names.is_empty() {
        output::info(&format!("No secrets for '{}'", config.deployment_id));
        return Ok(());
    }

    output::header(&format!("Secrets for '{}'", config.deployment_id));
    for name in names {
        println!("  {name}");
    }
    Ok(())
}
