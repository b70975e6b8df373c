use std::fs;
use std::path::PathBuf;

use rand::RngCore;

use crate::error::DeploymentError;
use crate::ssh::app_home;

pub const KEY_LEN: usize = 32;

fn key_path(app_name: &str) -> Result<PathBuf, DeploymentError> {
    Ok(app_home(app_name)?.join("key"))
}

/// Loads the workstation's vault key, generating one on first use.
///
/// Priority: `FLEETCRATE_VAULT_KEY` env var (hex-encoded, for CI), then the
/// file under `~/.<app>/key`. The key never leaves the workstation.
pub fn load_or_generate(app_name: &str) -> Result<[u8; KEY_LEN], DeploymentError> {
    if let Ok(hex_key) = std::env::var("FLEETCRATE_VAULT_KEY") {
        return decode_hex_key(&hex_key);
    }

    let path = key_path(app_name)?;
    if path.exists() {
        return read_key_file(&path);
    }

    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    write_key_file(&path, &key)?;
    Ok(key)
}

fn read_key_file(path: &PathBuf) -> Result<[u8; KEY_LEN], DeploymentError> {
    let content = fs::read_to_string(path).map_err(|e| {
        DeploymentError::ConfigInvalid(format!("failed to read vault key {}: {e}", path.display()))
    })?;
    decode_hex_key(content.trim())
}

fn decode_hex_key(s: &str) -> Result<[u8; KEY_LEN], DeploymentError> {
    let bytes = hex::decode(s)
        .map_err(|e| DeploymentError::ConfigInvalid(format!("invalid vault key encoding: {e}")))?;

    bytes.try_into().map_err(|b: Vec<u8>| {
        DeploymentError::ConfigInvalid(format!(
            "vault key must be {} bytes, got {}",
            KEY_LEN,
            b.len()
        ))
    })
}

fn write_key_file(path: &PathBuf, key: &[u8; KEY_LEN]) -> Result<(), DeploymentError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            DeploymentError::ConfigInvalid(format!("failed to create {}: {e}", dir.display()))
        })?;
    }

    fs::write(path, hex::encode(key)).map_err(|e| {
        DeploymentError::ConfigInvalid(format!("failed to write vault key {}: {e}", path.display()))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            DeploymentError::ConfigInvalid(format!("failed to set key file permissions: {e}"))
        })?;
    }

    Ok(())
}
