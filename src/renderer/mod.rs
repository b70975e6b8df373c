use std::collections::BTreeMap;

use minijinja::{context, Environment};
use serde::Serialize;

use crate::config::DeploymentConfig;
use crate::error::DeploymentError;

const DOCKERFILE_TEMPLATE: &str = include_str!("../../templates/Dockerfile.j2");
const COMPOSE_TEMPLATE: &str = include_str!("../../templates/docker-compose.yml.j2");
const ENTRYPOINT_TEMPLATE: &str = include_str!("../../templates/entrypoint.sh.j2");
const MAKEFILE_TEMPLATE: &str = include_str!("../../templates/Makefile.j2");

const DEFAULT_MEMORY_MB: u64 = 256;
const DEFAULT_CPU: f64 = 0.5;
const DEFAULT_RESTART_POLICY: &str = "unless-stopped";

/// A set of in-memory named files produced by one `render` call.
#[derive(Debug, Clone)]
pub struct RenderedBundle {
    pub dockerfile: String,
    pub compose: String,
    pub entrypoint: String,
    pub makefile: String,
}

impl RenderedBundle {
    /// Named (path, contents) pairs, in the layout they're uploaded under.
    pub fn files(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("Dockerfile", &self.dockerfile),
            ("docker-compose.yml", &self.compose),
            ("entrypoint.sh", &self.entrypoint),
            ("Makefile", &self.makefile),
        ]
    }
}

#[derive(Serialize)]
struct PortList(Vec<u16>);

/// Recipe Renderer (C3). Pure: the same `(config, version_id)` always
/// produces byte-identical output, since `config_hash` depends on it.
pub fn render(config: &DeploymentConfig, version_id: &str) -> Result<RenderedBundle, DeploymentError> {
    let mut env = Environment::new();
    env.add_template("Dockerfile", DOCKERFILE_TEMPLATE)
        .map_err(template_error)?;
    env.add_template("compose", COMPOSE_TEMPLATE)
        .map_err(template_error)?;
    env.add_template("entrypoint", ENTRYPOINT_TEMPLATE)
        .map_err(template_error)?;
    env.add_template("Makefile", MAKEFILE_TEMPLATE)
        .map_err(template_error)?;

    let sorted_env: Vec<(String, String)> = {
        let mut pairs: BTreeMap<String, String> = BTreeMap::new();
        pairs.extend(config.env_plain.clone());
        pairs.into_iter().collect()
    };

    let cpu = config.resources.cpu.unwrap_or(DEFAULT_CPU);
    let memory_mb = config.resources.memory_mb.unwrap_or(DEFAULT_MEMORY_MB);

    let ctx = context! {
        deployment_id => &config.deployment_id,
        version_id => version_id,
        image_base => &config.image_base,
        env_plain => sorted_env,
        runtime_name => &config.runtime.name,
        cpu_limit => cpu,
        memory_mb => memory_mb,
        restart_policy => DEFAULT_RESTART_POLICY,
        ports => Vec::<u16>::new(),
        data_dirs => &config.data_dirs,
    };

    Ok(RenderedBundle {
        dockerfile: env
            .get_template("Dockerfile")
            .and_then(|t| t.render(&ctx))
            .map_err(template_error)?,
        compose: env
            .get_template("compose")
            .and_then(|t| t.render(&ctx))
            .map_err(template_error)?,
        entrypoint: env
            .get_template("entrypoint")
            .and_then(|t| t.render(&ctx))
            .map_err(template_error)?,
        makefile: env
            .get_template("Makefile")
            .and_then(|t| t.render(&ctx))
            .map_err(template_error)?,
    })
}

fn template_error(e: minijinja::Error) -> DeploymentError {
    DeploymentError::ConfigInvalid(format!("template rendering failed: {e}"))
}
