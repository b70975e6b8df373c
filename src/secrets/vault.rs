use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use fs2::FileExt;
use rand::RngCore;

use crate::error::DeploymentError;
use crate::ssh::app_home;
use crate::ssh::Session;

const MAGIC: &[u8; 8] = b"FCVAULT\x01";
const FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

struct Entry {
    name: String,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    created_at: i64,
    updated_at: i64,
}

/// Secret Vault (C4): one local ciphertext file per deployment under
/// `~/.<app>/vaults/<deployment_id>.vault`, keyed by a symmetric key that
/// never leaves the workstation.
pub struct Vault {
    path: PathBuf,
    key: [u8; 32],
}

impl Vault {
    pub fn open(app_name: &str, deployment_id: &str, key: [u8; 32]) -> Result<Self, DeploymentError> {
        let path = app_home(app_name)?
            .join("vaults")
            .join(format!("{deployment_id}.vault"));
        Ok(Self { path, key })
    }

    #[cfg(test)]
    fn open_at(path: PathBuf, key: [u8; 32]) -> Self {
        Self { path, key }
    }

    /// Creates or updates `name`. Rejects plaintext with a newline or null
    /// byte, since those cannot round-trip through the env-file format.
    pub fn set(&self, name: &str, plaintext: &[u8]) -> Result<(), DeploymentError> {
        if plaintext.contains(&b'\n') || plaintext.contains(&0) {
            return Err(DeploymentError::ConfigInvalid(format!(
                "secret '{name}' contains a newline or null byte"
            )));
        }

        with_locked_file(&self.path, |entries| {
            let now = now_unix();
            let cipher = self.cipher();
            let mut nonce_bytes = [0u8; NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);

            let aad = aad_bytes(name);
            let ciphertext = cipher
                .encrypt(
                    Nonce::from_slice(&nonce_bytes),
                    chacha20poly1305::aead::Payload {
                        msg: plaintext,
                        aad: &aad,
                    },
                )
                .map_err(|_| {
                    DeploymentError::ConfigInvalid(format!("failed to encrypt secret '{name}'"))
                })?;

            let created_at = entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.created_at)
                .unwrap_or(now);

            entries.retain(|e| e.name != name);
            entries.push(Entry {
                name: name.to_string(),
                nonce: nonce_bytes,
                ciphertext,
                created_at,
                updated_at: now,
            });

            Ok(())
        })
    }

    pub fn get(&self, name: &str) -> Result<Vec<u8>, DeploymentError> {
        let entries = read_entries(&self.path)?;
        let entry = entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| DeploymentError::SecretMissing {
                name: name.to_string(),
            })?;

        let cipher = self.cipher();
        let aad = aad_bytes(&entry.name);
        cipher
            .decrypt(
                Nonce::from_slice(&entry.nonce),
                chacha20poly1305::aead::Payload {
                    msg: &entry.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| DeploymentError::SecretCorrupt {
                name: name.to_string(),
            })
    }

    /// Idempotent: no error if `name` is absent.
    pub fn remove(&self, name: &str) -> Result<(), DeploymentError> {
        with_locked_file(&self.path, |entries| {
            entries.retain(|e| e.name != name);
            Ok(())
        })
    }

    pub fn list(&self) -> Result<Vec<String>, DeploymentError> {
        Ok(read_entries(&self.path)?.into_iter().map(|e| e.name).collect())
    }

    /// Writes an env-format file on the host containing exactly the secrets
    /// named in `required`, mode 0600, atomically (write-temp-then-rename).
    pub async fn materialize(
        &self,
        session: &dyn Session,
        remote_path: &str,
        required: &[String],
    ) -> Result<(), DeploymentError> {
        let mut resolved: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for name in required {
            resolved.insert(name.clone(), self.get(name)?);
        }

        let mut lines = Vec::new();
        for (name, value) in &resolved {
            let mut line = format!("{name}=").into_bytes();
            line.extend_from_slice(value);
            line.push(b'\n');
            lines.extend_from_slice(&line);
        }

        session.upload(&lines, remote_path, 0o600).await
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

/// Associated data binds (name, format_version); patching either half of an
/// entry or swapping two entries' names fails authentication.
fn aad_bytes(name: &str) -> Vec<u8> {
    format!("{name}\0v{FORMAT_VERSION}").into_bytes()
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn with_locked_file(
    path: &Path,
    mutate: impl FnOnce(&mut Vec<Entry>) -> Result<(), DeploymentError>,
) -> Result<(), DeploymentError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            DeploymentError::ConfigInvalid(format!("failed to create {}: {e}", dir.display()))
        })?;
    }

    let file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| {
            DeploymentError::ConfigInvalid(format!("failed to open vault {}: {e}", path.display()))
        })?;

    file.lock_exclusive().map_err(|e| {
        DeploymentError::ConfigInvalid(format!("failed to lock vault {}: {e}", path.display()))
    })?;

    let mut entries = decode(&fs::read(path).unwrap_or_default())?;
    mutate(&mut entries)?;
    fs::write(path, encode(&entries)).map_err(|e| {
        DeploymentError::ConfigInvalid(format!("failed to write vault {}: {e}", path.display()))
    })?;

    let _ = file.unlock();
    Ok(())
}

fn read_entries(path: &Path) -> Result<Vec<Entry>, DeploymentError> {
    let Ok(raw) = fs::read(path) else {
        return Ok(Vec::new());
    };
    decode(&raw)
}

fn encode(entries: &[Entry]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    buf.push(0); // reserved: key-derivation parameters (key is not KDF-derived)

    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        let name_bytes = entry.name.as_bytes();
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(name_bytes);
        buf.extend_from_slice(&entry.nonce);
        buf.extend_from_slice(&(entry.ciphertext.len() as u32).to_le_bytes());
        buf.extend_from_slice(&entry.ciphertext);
        buf.extend_from_slice(&entry.created_at.to_le_bytes());
        buf.extend_from_slice(&entry.updated_at.to_le_bytes());
    }
    buf
}

fn decode(raw: &[u8]) -> Result<Vec<Entry>, DeploymentError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let corrupt = || DeploymentError::ConfigInvalid("vault file is corrupt or truncated".to_string());

    if raw.len() < MAGIC.len() + 2 || &raw[..MAGIC.len()] != MAGIC {
        return Err(corrupt());
    }

    let mut pos = MAGIC.len();
    let version = raw[pos];
    pos += 1;
    if version != FORMAT_VERSION {
        return Err(DeploymentError::ConfigInvalid(format!(
            "unsupported vault format version {version}"
        )));
    }
    pos += 1; // reserved byte

    let count = u32::from_le_bytes(raw.get(pos..pos + 4).ok_or_else(corrupt)?.try_into().unwrap());
    pos += 4;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_len = u16::from_le_bytes(raw.get(pos..pos + 2).ok_or_else(corrupt)?.try_into().unwrap()) as usize;
        pos += 2;
        let name = String::from_utf8(raw.get(pos..pos + name_len).ok_or_else(corrupt)?.to_vec())
            .map_err(|_| corrupt())?;
        pos += name_len;

        let nonce: [u8; NONCE_LEN] = raw.get(pos..pos + NONCE_LEN).ok_or_else(corrupt)?.try_into().unwrap();
        pos += NONCE_LEN;

        let ct_len = u32::from_le_bytes(raw.get(pos..pos + 4).ok_or_else(corrupt)?.try_into().unwrap()) as usize;
        pos += 4;
        let ciphertext = raw.get(pos..pos + ct_len).ok_or_else(corrupt)?.to_vec();
        pos += ct_len;

        let created_at = i64::from_le_bytes(raw.get(pos..pos + 8).ok_or_else(corrupt)?.try_into().unwrap());
        pos += 8;
        let updated_at = i64::from_le_bytes(raw.get(pos..pos + 8).ok_or_else(corrupt)?.try_into().unwrap());
        pos += 8;

        entries.push(Entry {
            name,
            nonce,
            ciphertext,
            created_at,
            updated_at,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> (tempfile::TempDir, Vault) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.vault");
        let key = [7u8; 32];
        let vault = Vault::open_at(path, key);
        (dir, vault)
    }

    #[test]
    fn round_trips_a_secret() {
        let (_dir, vault) = test_vault();
        vault.set("API_KEY", b"abc123").unwrap();
        assert_eq!(vault.get("API_KEY").unwrap(), b"abc123");
    }

    #[test]
    fn rejects_newline_plaintext() {
        let (_dir, vault) = test_vault();
        let err = vault.set("API_KEY", b"abc\n123").unwrap_err();
        assert!(matches!(err, DeploymentError::ConfigInvalid(_)));
    }

    #[test]
    fn missing_secret_is_reported() {
        let (_dir, vault) = test_vault();
        let err = vault.get("NOPE").unwrap_err();
        assert!(matches!(err, DeploymentError::SecretMissing { .. }));
    }

    #[test]
    fn remove_is_idempotent() {
        let (_dir, vault) = test_vault();
        vault.remove("NOPE").unwrap();
        vault.set("A", b"1").unwrap();
        vault.remove("A").unwrap();
        vault.remove("A").unwrap();
        assert!(vault.list().unwrap().is_empty());
    }

    #[test]
    fn corrupted_ciphertext_is_detected() {
        let (dir, vault) = test_vault();
        vault.set("API_KEY", b"abc123").unwrap();

        let path = dir.path().join("demo.vault");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&path, raw).unwrap();

        let err = vault.get("API_KEY").unwrap_err();
        assert!(matches!(err, DeploymentError::SecretCorrupt { .. }));
    }

    #[test]
    fn swapped_names_fail_authentication() {
        let (dir, vault) = test_vault();
        vault.set("ALPHA", b"one").unwrap();
        vault.set("BETA", b"two").unwrap();

        let path = dir.path().join("demo.vault");
        let raw = fs::read(&path).unwrap();
        let mut entries = decode(&raw).unwrap();
        let tmp = entries[0].name.clone();
        entries[0].name = entries[1].name.clone();
        entries[1].name = tmp;
        fs::write(&path, encode(&entries)).unwrap();

        assert!(matches!(vault.get("ALPHA"), Err(DeploymentError::SecretCorrupt { .. })));
        assert!(matches!(vault.get("BETA"), Err(DeploymentError::SecretCorrupt { .. })));
    }
}
