use crate::error::DeploymentError;
use crate::ssh::Session;

/// The package manager family detected on a host, selected in the fixed
/// order apt -> dnf/yum -> apk from `/etc/os-release`. A small tagged enum
/// rather than a trait-object hierarchy, since the family set is closed and
/// small.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Apk,
}

impl PackageManager {
    /// Detects the host's package manager by reading `/etc/os-release`.
    pub async fn detect(session: &dyn Session) -> Result<Self, DeploymentError> {
        let content = session.exec("cat /etc/os-release").await?;
        let id = parse_os_release_id(&content);

        Self::from_id(&id)
    }

    fn from_id(id: &str) -> Result<Self, DeploymentError> {
        match id {
            "ubuntu" | "debian" => Ok(PackageManager::Apt),
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => Ok(PackageManager::Dnf),
            "alpine" => Ok(PackageManager::Apk),
            other => Err(DeploymentError::UnsupportedHostError {
                distro_id: other.to_string(),
                hint: "supported distributions: ubuntu, debian, fedora, rhel, centos, rocky, \
                       almalinux, alpine. Install the container runtime and compose tool \
                       manually, then retry."
                    .to_string(),
            }),
        }
    }

    /// Installs `pkg` through the detected package manager, using `sudo -n`
    /// first and the supplied password as fallback.
    pub async fn install(
        &self,
        session: &dyn Session,
        pkg: &str,
        password: Option<&str>,
    ) -> Result<(), DeploymentError> {
        let cmd = match self {
            PackageManager::Apt => format!("apt-get update -qq && apt-get install -y -qq {pkg}"),
            PackageManager::Dnf => format!(
                "(command -v dnf >/dev/null && dnf install -y -q {pkg}) || yum install -y -q {pkg}"
            ),
            PackageManager::Apk => format!("apk add --quiet {pkg}"),
        };

        session.sudo_exec_with_password(&cmd, password).await?;
        Ok(())
    }

    /// Verifies `pkg` is present and, if `min_version` is given, at or above
    /// that version. Returns the detected version string on success.
    pub async fn verify(
        &self,
        session: &dyn Session,
        pkg: &str,
        min_version: Option<&str>,
    ) -> Result<Option<String>, DeploymentError> {
        let present = session.exec_ok(&format!("command -v {pkg}")).await?;
        if !present {
            return Ok(None);
        }

        let version = session
            .exec(&format!("{pkg} --version 2>/dev/null | head -n1 || true"))
            .await
            .unwrap_or_default();

        if let Some(min) = min_version {
            if !version_at_least(&version, min) {
                return Err(DeploymentError::InstallVerificationError {
                    dependency: pkg.to_string(),
                    detail: format!("found '{}', need at least {}", version.trim(), min),
                });
            }
        }

        Ok(Some(version.trim().to_string()))
    }
}

fn parse_os_release_id(content: &str) -> String {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("ID=") {
            return rest.trim_matches('"').to_string();
        }
    }
    String::new()
}

/// Compares a loosely-formatted version string against a minimum, extracting
/// the first dotted-numeric run from each side.
fn version_at_least(found: &str, min: &str) -> bool {
    let found_nums = extract_version_numbers(found);
    let min_nums = extract_version_numbers(min);

    if found_nums.is_empty() {
        // Could not parse a version out of the tool's output; don't block
        // on a formatting mismatch the Bootstrapper can't resolve itself.
        return true;
    }

    found_nums.cmp(&min_nums).is_ge()
}

fn extract_version_numbers(s: &str) -> Vec<u64> {
    let digits_run = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect::<String>();

    digits_run
        .split('.')
        .filter_map(|part| part.parse::<u64>().ok())
        .collect()
}
