use anyhow::{bail, Context, Result};
use dialoguer::Input;
use minijinja::Environment;
use std::path::Path;

const TEMPLATE: &str = include_str!("../../templates/deployment.toml.j2");

pub fn run(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let default_id = std::env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "myapp".to_string());

    let deployment_id: String = Input::new()
        .with_prompt("Deployment id")
        .default(default_id)
        .interact_text()?;

    let host: String = Input::new().with_prompt("Host").interact_text()?;

    let user: String = Input::new()
        .with_prompt("SSH user")
        .default("deploy".to_string())
        .interact_text()?;

    let key_path: String = Input::new()
        .with_prompt("SSH private key path")
        .default("~/.ssh/id_ed25519".to_string())
        .interact_text()?;

    let runtime_name: String = Input::new()
        .with_prompt("Runtime name (e.g. python3, node)")
        .interact_text()?;

    let runtime_min_version: String = Input::new()
        .with_prompt("Minimum runtime version")
        .interact_text()?;

    let image_base: String = Input::new()
        .with_prompt("Base image")
        .interact_text()?;

    let mut env = Environment::new();
    env.add_template("deployment.toml", TEMPLATE)?;
    let tmpl = env.get_template("deployment.toml").unwrap();
    let content = tmpl.render(minijinja::context! {
        deployment_id => deployment_id,
        host => host,
        user => user,
        key_path => key_path,
        runtime_name => runtime_name,
        runtime_min_version => runtime_min_version,
        image_base => image_base,
    })?;

    std::fs::write(config_path, content)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    crate::output::success(&format!("Created {}", config_path.display()));
    crate::output::info("Edit the file, then run `fleetcrate bootstrap` to prepare the host.");

    Ok(())
}
