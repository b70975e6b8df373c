mod validate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DeploymentError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    Key { path: PathBuf },
    Agent,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ResourceLimits {
    pub cpu: Option<f64>,
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeRequirement {
    pub name: String,
    pub min_version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_max_count")]
    pub max_count: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_max_count() -> usize {
    5
}

fn default_max_age_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploymentConfig {
    pub deployment_id: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub auth: AuthConfig,
    pub runtime: RuntimeRequirement,
    pub image_base: String,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub env_plain: HashMap<String, String>,
    #[serde(default)]
    pub secrets_required: Vec<String>,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub data_dirs: Vec<String>,
}

fn default_port() -> u16 {
    22
}

impl DeploymentConfig {
    pub fn load(path: &Path) -> Result<Self, DeploymentError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeploymentError::ConfigInvalid(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            DeploymentError::ConfigInvalid(format!(
                "failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        validate::validate(&config)?;

        Ok(config)
    }

    /// Stable hash over the config, excluding host credentials, used as
    /// `VersionRecord::config_hash` and for "already running" detection.
    pub fn config_hash(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut sorted_env: Vec<(&String, &String)> = self.env_plain.iter().collect();
        sorted_env.sort_by_key(|(k, _)| k.clone());

        let mut sorted_secrets = self.secrets_required.clone();
        sorted_secrets.sort();

        let hashable = format!(
            "{}|{}|{}|{}|{:?}|{}|{:?}|{:?}",
            self.deployment_id,
            self.runtime.name,
            self.runtime.min_version,
            self.image_base,
            self.resources,
            sorted_env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
            sorted_secrets,
            self.data_dirs,
        );

        let mut hasher = Sha256::new();
        hasher.update(hashable.as_bytes());
        hex::encode(hasher.finalize())
    }
}
