use super::DeploymentConfig;
use crate::error::DeploymentError;

const ID_MAX_LEN: usize = 32;

/// Gathers every validation failure into a single `ConfigInvalid` error
/// rather than stopping at the first one, so a caller sees the whole
/// picture in one pass.
pub fn validate(config: &DeploymentConfig) -> Result<(), DeploymentError> {
    let mut problems = Vec::new();

    if config.deployment_id.is_empty() {
        problems.push("deployment_id cannot be empty".to_string());
    } else if config.deployment_id.len() > ID_MAX_LEN {
        problems.push(format!(
            "deployment_id '{}' exceeds {} characters",
            config.deployment_id, ID_MAX_LEN
        ));
    } else if !is_valid_deployment_id(&config.deployment_id) {
        problems.push(format!(
            "deployment_id '{}' must match [a-z0-9-]+",
            config.deployment_id
        ));
    }

    if config.host.is_empty() {
        problems.push("host cannot be empty".to_string());
    }

    if config.user.is_empty() {
        problems.push("user cannot be empty".to_string());
    }

    match &config.auth {
        super::AuthConfig::Key { path } => {
            if path.as_os_str().is_empty() {
                problems.push("auth.path cannot be empty for kind=key".to_string());
            }
        }
        super::AuthConfig::Agent => {}
    }

    if config.runtime.name.is_empty() {
        problems.push("runtime.name cannot be empty".to_string());
    }

    if config.image_base.is_empty() {
        problems.push("image_base cannot be empty".to_string());
    }

    if config.retention.max_count < 1 {
        problems.push("retention.max_count must be at least 1".to_string());
    }

    for secret_name in &config.secrets_required {
        if !is_valid_secret_name(secret_name) {
            problems.push(format!(
                "secrets_required entry '{}' must match [A-Z_][A-Z0-9_]*",
                secret_name
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(DeploymentError::ConfigInvalid(problems.join("; ")))
    }
}

fn is_valid_deployment_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn is_valid_secret_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, ResourceLimits, RetentionPolicy, RuntimeRequirement};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn base_config() -> DeploymentConfig {
        DeploymentConfig {
            deployment_id: "demo".to_string(),
            host: "h1".to_string(),
            port: 22,
            user: "deploy".to_string(),
            auth: AuthConfig::Key {
                path: PathBuf::from("/home/deploy/.ssh/id_ed25519"),
            },
            runtime: RuntimeRequirement {
                name: "python".to_string(),
                min_version: "3.11".to_string(),
            },
            image_base: "python:3.11-slim".to_string(),
            resources: ResourceLimits::default(),
            env_plain: HashMap::new(),
            secrets_required: vec!["API_KEY".to_string()],
            retention: RetentionPolicy::default(),
            data_dirs: vec![],
        }
    }

    #[test]
    fn accepts_a_well_formed_config() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn rejects_bad_deployment_id() {
        let mut config = base_config();
        config.deployment_id = "Demo_Bot".to_string();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, DeploymentError::ConfigInvalid(_)));
    }

    #[test]
    fn collects_multiple_problems_at_once() {
        let mut config = base_config();
        config.deployment_id = String::new();
        config.host = String::new();
        config.secrets_required = vec!["bad-name".to_string()];

        match validate(&config) {
            Err(DeploymentError::ConfigInvalid(msg)) => {
                assert!(msg.contains("deployment_id"));
                assert!(msg.contains("host"));
                assert!(msg.contains("secrets_required"));
            }
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_retention_count() {
        let mut config = base_config();
        config.retention.max_count = 0;
        assert!(validate(&config).is_err());
    }
}
