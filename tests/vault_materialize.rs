//! Secret round-trip plus the vault's materialize step onto a host,
//! exercised against the recording stub rather than the unit tests already
//! beside `secrets::vault` (which cover the on-disk format in isolation).

mod common;

use common::StubSession;
use fleetcrate::error::DeploymentError;
use fleetcrate::secrets::Vault;
use fleetcrate::ssh::Session;

fn unique_app_name(tag: &str) -> String {
    let pid = std::process::id();
    format!("fleetcrate-inttest-{tag}-{pid}")
}

fn cleanup(app_name: &str) {
    if let Some(home) = dirs::home_dir() {
        let _ = std::fs::remove_dir_all(home.join(format!(".{app_name}")));
    }
}

#[test]
fn round_trips_and_detects_corruption() {
    let app_name = unique_app_name("roundtrip");
    cleanup(&app_name);

    let key = [9u8; 32];
    let vault = Vault::open(&app_name, "demo", key).unwrap();

    vault.set("API_KEY", b"abc123").unwrap();
    assert_eq!(vault.get("API_KEY").unwrap(), b"abc123");

    // Binary-patch the vault file to simulate on-disk corruption.
    let path = dirs::home_dir()
        .unwrap()
        .join(format!(".{app_name}"))
        .join("vaults")
        .join("demo.vault");
    let mut raw = std::fs::read(&path).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0xFF;
    std::fs::write(&path, raw).unwrap();

    let err = vault.get("API_KEY").unwrap_err();
    assert!(matches!(err, DeploymentError::SecretCorrupt { .. }));

    cleanup(&app_name);
}

#[tokio::test]
async fn materialize_writes_only_the_required_secrets() {
    let app_name = unique_app_name("materialize");
    cleanup(&app_name);

    let key = [3u8; 32];
    let vault = Vault::open(&app_name, "demo", key).unwrap();
    vault.set("API_KEY", b"abc123").unwrap();
    vault.set("UNUSED", b"should-not-appear").unwrap();

    let stub = StubSession::bare("ubuntu");
    vault
        .materialize(&stub, "/home/deploy/deployments/demo/secrets.env", &["API_KEY".to_string()])
        .await
        .unwrap();

    let bytes = stub
        .download("/home/deploy/deployments/demo/secrets.env")
        .await
        .unwrap();
    let content = String::from_utf8(bytes).unwrap();

    assert_eq!(content, "API_KEY=abc123\n");
    assert!(!content.contains("UNUSED"));

    cleanup(&app_name);
}
