//! A recording, in-memory stand-in for `RemoteSession`, used to drive
//! higher-level components (layout, versions, backups, containers,
//! bootstrap) through end-to-end deployment scenarios without a real host.
//!
//! Every `run`/`exec` invocation is appended to `commands()` in order, so a
//! test can assert on the shape of what was sent over the wire, not just
//! the end state.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fleetcrate::error::DeploymentError;
use fleetcrate::ssh::exec::CommandOutput;
use fleetcrate::ssh::Session;

#[derive(Clone)]
enum Entry {
    File(Vec<u8>),
    Dir,
    Symlink(String),
}

struct Container {
    image_digest: String,
    running: bool,
    started_at: chrono::DateTime<Utc>,
    restarts: u32,
    health: &'static str,
}

/// Backing state for a [`StubSession`]. Shared across the test and the
/// session handle so a test can inspect host state the Coordinator-level
/// components mutated.
pub struct StubSession {
    host: String,
    user: String,
    fs: Mutex<BTreeMap<String, Entry>>,
    containers: Mutex<BTreeMap<String, Container>>,
    installed: Mutex<BTreeMap<String, String>>,
    os_release_id: String,
    commands: Mutex<Vec<String>>,
    force_unhealthy: Mutex<bool>,
}

impl StubSession {
    /// A host with only shell basics present — nothing installed yet.
    pub fn bare(os_release_id: &str) -> Self {
        Self {
            host: "h1".to_string(),
            user: "deploy".to_string(),
            fs: Mutex::new(BTreeMap::new()),
            containers: Mutex::new(BTreeMap::new()),
            installed: Mutex::new(BTreeMap::new()),
            os_release_id: os_release_id.to_string(),
            commands: Mutex::new(Vec::new()),
            force_unhealthy: Mutex::new(false),
        }
    }

    /// A host that already has the runtime, container daemon, and compose
    /// tool present at satisfying versions.
    pub fn provisioned(os_release_id: &str, runtime_name: &str, runtime_version: &str) -> Self {
        let s = Self::bare(os_release_id);
        {
            let mut installed = s.installed.lock().unwrap();
            installed.insert(runtime_name.to_string(), runtime_version.to_string());
            installed.insert("docker".to_string(), "24.0.5".to_string());
            installed.insert("compose".to_string(), "plugin".to_string());
        }
        s
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// After this call, every container health probe reports `unhealthy`,
    /// simulating S4's failing new version.
    pub fn force_unhealthy(&self) {
        *self.force_unhealthy.lock().unwrap() = true;
    }

    fn record(&self, cmd: &str) {
        self.commands.lock().unwrap().push(cmd.to_string());
    }

    fn mkdir_p(&self, path: &str) {
        let mut fs = self.fs.lock().unwrap();
        let mut built = String::new();
        for part in path.trim_matches('/').split('/') {
            built.push('/');
            built.push_str(part);
            fs.entry(built.clone()).or_insert(Entry::Dir);
        }
    }

    fn rm_rf(&self, path: &str) {
        let mut fs = self.fs.lock().unwrap();
        let prefix = format!("{path}/");
        fs.retain(|k, _| k != path && !k.starts_with(&prefix));
    }

    fn resolve(&self, path: &str) -> String {
        match self.fs.lock().unwrap().get(path) {
            Some(Entry::Symlink(target)) => target.clone(),
            _ => path.to_string(),
        }
    }

    fn ls1(&self, dir: &str) -> Vec<String> {
        let fs = self.fs.lock().unwrap();
        let prefix = format!("{dir}/");
        let mut names: Vec<String> = fs
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(|s| s.to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn archive(&self, root: &str, inputs: &[&str]) -> Vec<u8> {
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        for input in inputs {
            let abs = if input.starts_with('/') {
                input.to_string()
            } else {
                format!("{root}/{input}")
            };
            let resolved = self.resolve(&abs);
            self.collect(&resolved, input, &mut entries);
        }
        encode_archive(&entries)
    }

    fn collect(&self, abs: &str, rel: &str, out: &mut Vec<(String, Vec<u8>)>) {
        let fs = self.fs.lock().unwrap();
        match fs.get(abs) {
            Some(Entry::File(bytes)) => out.push((rel.to_string(), bytes.clone())),
            Some(Entry::Dir) | None => {
                let prefix = format!("{abs}/");
                let children: Vec<(String, String)> = fs
                    .keys()
                    .filter_map(|k| {
                        k.strip_prefix(&prefix)
                            .filter(|rest| !rest.contains('/'))
                            .map(|rest| (k.clone(), format!("{rel}/{rest}")))
                    })
                    .collect();
                drop(fs);
                for (child_abs, child_rel) in children {
                    self.collect(&child_abs, &child_rel, out);
                }
            }
            Some(Entry::Symlink(target)) => {
                let target = target.clone();
                drop(fs);
                self.collect(&target, rel, out);
            }
        }
    }

    fn extract(&self, bytes: &[u8], dest_root: &str) {
        for (rel, content) in decode_archive(bytes) {
            let abs = format!("{dest_root}/{rel}");
            if let Some(parent) = abs.rsplit_once('/').map(|(p, _)| p) {
                self.mkdir_p(parent);
            }
            self.fs.lock().unwrap().insert(abs, Entry::File(content));
        }
    }

    fn execute(&self, cmd: &str) -> (i32, String, String) {
        self.record(cmd);

        if let Some(rest) = cmd.strip_prefix("mkdir -p ") {
            for dir in rest.split_whitespace() {
                self.mkdir_p(dir);
            }
            return (0, String::new(), String::new());
        }

        if let Some(dir) = cmd.strip_prefix("mkdir ") {
            let exists = self.fs.lock().unwrap().contains_key(dir);
            if exists {
                return (1, String::new(), "File exists".to_string());
            }
            self.mkdir_p(dir);
            return (0, String::new(), String::new());
        }

        if let Some(dir) = cmd.strip_prefix("rmdir ") {
            self.rm_rf(dir);
            return (0, String::new(), String::new());
        }

        if let Some(path) = cmd.strip_prefix("readlink -f ") {
            return (0, self.resolve(path), String::new());
        }

        if let Some(path) = cmd.strip_prefix("rm -rf ") {
            self.rm_rf(path);
            return (0, String::new(), String::new());
        }

        if let Some(rest) = cmd.strip_prefix("ls -1 ") {
            let dir = rest.trim_end_matches(" 2>/dev/null || true").trim();
            let names = self.ls1(dir);
            return (0, names.join("\n"), String::new());
        }

        if let Some(path) = cmd.strip_prefix("stat -c%s ") {
            let size = match self.fs.lock().unwrap().get(path) {
                Some(Entry::File(bytes)) => bytes.len(),
                _ => 0,
            };
            return (0, size.to_string(), String::new());
        }

        if cmd.starts_with("cd ") && cmd.contains("&& tar -czhf ") {
            let (cd_part, tar_part) = cmd.split_once("&& tar -czhf ").unwrap();
            let root = cd_part.trim_start_matches("cd ").trim();
            let mut words = tar_part.split_whitespace();
            let archive_path = words.next().unwrap_or_default().to_string();
            let inputs: Vec<&str> = words.collect();
            let bytes = self.archive(root, &inputs);
            self.fs
                .lock()
                .unwrap()
                .insert(archive_path, Entry::File(bytes));
            return (0, String::new(), String::new());
        }

        if let Some(rest) = cmd.strip_prefix("tar -xzf ") {
            let (archive_path, dest) = rest.split_once(" -C ").unwrap_or((rest, ""));
            let bytes = match self.fs.lock().unwrap().get(archive_path) {
                Some(Entry::File(b)) => b.clone(),
                _ => Vec::new(),
            };
            self.extract(&bytes, dest.trim());
            return (0, String::new(), String::new());
        }

        if let Some(rest) = cmd.strip_prefix("cp ") {
            let (from, to) = rest.split_once(' ').unwrap_or((rest, ""));
            let content = match self.fs.lock().unwrap().get(from) {
                Some(Entry::File(b)) => Some(b.clone()),
                _ => None,
            };
            if let Some(bytes) = content {
                self.fs
                    .lock()
                    .unwrap()
                    .insert(to.to_string(), Entry::File(bytes));
                return (0, String::new(), String::new());
            }
            return (1, String::new(), "no such file".to_string());
        }

        if cmd == "cat /etc/os-release" {
            return (0, format!("ID={}\n", self.os_release_id), String::new());
        }

        if let Some(tool) = cmd.strip_prefix("command -v ") {
            let present = ["sh", "uname", "id"].contains(&tool)
                || self.installed.lock().unwrap().contains_key(tool)
                || (tool == "docker" && self.installed.lock().unwrap().contains_key("docker"));
            return if present {
                (0, tool.to_string(), String::new())
            } else {
                (1, String::new(), String::new())
            };
        }

        if cmd.ends_with("--version 2>/dev/null | head -n1 || true") {
            let pkg = cmd
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            let version = self.installed.lock().unwrap().get(&pkg).cloned();
            return match version {
                Some(v) => (0, format!("{pkg} version {v}"), String::new()),
                None => (0, String::new(), String::new()),
            };
        }

        if cmd.contains("apt-get install")
            || cmd.contains("dnf install")
            || cmd.contains("yum install")
            || cmd.contains("apk add")
        {
            if let Some(pkg) = cmd.split_whitespace().last() {
                let pkg = pkg.trim_end_matches(')');
                let mut installed = self.installed.lock().unwrap();
                match pkg {
                    "docker.io" => {
                        installed.insert("docker".to_string(), "24.0.5".to_string());
                    }
                    "docker-compose-plugin" => {
                        installed.insert("compose".to_string(), "plugin".to_string());
                    }
                    other => {
                        installed.insert(other.to_string(), "999.0".to_string());
                    }
                }
            }
            return (0, String::new(), String::new());
        }

        if cmd == "docker info >/dev/null 2>&1" {
            let present = self.installed.lock().unwrap().contains_key("docker");
            return (if present { 0 } else { 1 }, String::new(), String::new());
        }

        if cmd.contains("systemctl enable --now docker") {
            self.installed
                .lock()
                .unwrap()
                .insert("docker".to_string(), "24.0.5".to_string());
            return (0, String::new(), String::new());
        }

        if cmd == "docker compose version >/dev/null 2>&1" {
            let present = self
                .installed
                .lock()
                .unwrap()
                .get("compose")
                .map(|v| v == "plugin")
                .unwrap_or(false);
            return (if present { 0 } else { 1 }, String::new(), String::new());
        }

        if cmd.starts_with("cd ") && cmd.contains("&& docker compose build --quiet") {
            let dir = cmd
                .trim_start_matches("cd ")
                .split(" && ")
                .next()
                .unwrap_or_default();
            let digest = format!("sha256:{:x}", simple_hash(dir));
            self.containers.lock().unwrap().insert(
                dir.to_string(),
                Container {
                    image_digest: digest,
                    running: false,
                    started_at: Utc::now(),
                    restarts: 0,
                    health: "healthy",
                },
            );
            return (0, String::new(), String::new());
        }

        if cmd.contains("docker compose images --format json") {
            let dir = cmd
                .trim_start_matches("cd ")
                .split(" && ")
                .next()
                .unwrap_or_default();
            let digest = self
                .containers
                .lock()
                .unwrap()
                .get(dir)
                .map(|c| c.image_digest.clone())
                .unwrap_or_default();
            return (0, digest, String::new());
        }

        if cmd.starts_with("cd ") && cmd.contains("&& docker compose up -d --force-recreate") {
            return self.compose_up(cmd, "&& docker compose up -d --force-recreate");
        }

        if cmd.starts_with("cd ") && cmd.ends_with("&& docker compose up -d") {
            return self.compose_up(cmd, "&& docker compose up -d");
        }

        if cmd.starts_with("cd ") && cmd.contains("&& docker compose stop -t ") {
            let dir = self.resolve(cmd.trim_start_matches("cd ").split(" && ").next().unwrap_or_default());
            if let Some(c) = self.containers.lock().unwrap().get_mut(&dir) {
                c.running = false;
            }
            return (0, String::new(), String::new());
        }

        if cmd.starts_with("cd ") && cmd.ends_with("&& docker compose ps -q") {
            let dir = self.resolve(cmd.trim_start_matches("cd ").split(" && ").next().unwrap_or_default());
            let running = self
                .containers
                .lock()
                .unwrap()
                .get(&dir)
                .map(|c| c.running)
                .unwrap_or(false);
            return if running {
                (0, dir.clone(), String::new())
            } else {
                (0, String::new(), String::new())
            };
        }

        if cmd.contains("docker compose ps -q --status running") {
            let dir = self.resolve(cmd.trim_start_matches("cd ").split(" && ").next().unwrap_or_default());
            let running = self
                .containers
                .lock()
                .unwrap()
                .get(&dir)
                .map(|c| c.running)
                .unwrap_or(false);
            return (if running { 0 } else { 1 }, String::new(), String::new());
        }

        if cmd.contains("docker compose ps -q | wc -l") {
            let dir = self.resolve(cmd.trim_start_matches("cd ").split(" && ").next().unwrap_or_default());
            let running = self
                .containers
                .lock()
                .unwrap()
                .get(&dir)
                .map(|c| c.running)
                .unwrap_or(false);
            return (if running { 0 } else { 1 }, String::new(), String::new());
        }

        if cmd.contains("docker compose ps --format json") {
            let dir = self.resolve(cmd.trim_start_matches("cd ").split(" && ").next().unwrap_or_default());

            let running = self
                .containers
                .lock()
                .unwrap()
                .get(&dir)
                .map(|c| c.running)
                .unwrap_or(false);

            if let Some(target_hash) = cmd
                .split("config_hash=")
                .nth(1)
                .and_then(|rest| rest.split('[').next())
            {
                // The real compose tool reports the label baked into the
                // rendered compose file; the stub reads it back the same
                // way instead of tracking it out of band.
                let compose_path = format!("{dir}/docker-compose.yml");
                let label_present = match self.fs.lock().unwrap().get(&compose_path) {
                    Some(Entry::File(bytes)) => {
                        String::from_utf8_lossy(bytes).contains(&format!("config_hash={target_hash}"))
                    }
                    _ => false,
                };
                if running && label_present {
                    return (0, "match".to_string(), String::new());
                }
            }
            return (0, String::new(), String::new());
        }

        if let Some(rest) = cmd.strip_prefix("docker inspect --format '{{.State.Running}}") {
            let id = rest.rsplit(' ').next().unwrap_or_default();
            let container = self.containers.lock().unwrap();
            let found = container.get(id);
            let out = match found {
                Some(c) => format!(
                    "true|{}|{}|{}",
                    c.started_at.to_rfc3339(),
                    c.restarts,
                    c.image_digest
                ),
                None => "false|-|0|-".to_string(),
            };
            return (0, out, String::new());
        }

        if cmd.contains("docker inspect --format='{{.State.Health.Status}}'") {
            let forced = *self.force_unhealthy.lock().unwrap();
            return (0, if forced { "unhealthy" } else { "healthy" }.to_string(), String::new());
        }

        if cmd.contains("docker logs --tail 200") {
            return (0, String::new(), String::new());
        }

        (0, String::new(), String::new())
    }

    fn compose_up(&self, cmd: &str, marker: &str) -> (i32, String, String) {
        let dir = self.resolve(cmd.trim_start_matches("cd ").split(marker).next().unwrap_or_default().trim_end_matches(" "));
        let mut containers = self.containers.lock().unwrap();
        let entry = containers.entry(dir.clone()).or_insert(Container {
            image_digest: format!("sha256:{:x}", simple_hash(&dir)),
            running: false,
            started_at: Utc::now(),
            restarts: 0,
            health: "healthy",
        });
        entry.running = true;
        entry.started_at = Utc::now();
        (0, String::new(), String::new())
    }
}

fn simple_hash(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}

fn encode_archive(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (path, content) in entries {
        let path_bytes = path.as_bytes();
        buf.extend_from_slice(&(path_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(path_bytes);
        buf.extend_from_slice(&(content.len() as u32).to_le_bytes());
        buf.extend_from_slice(content);
    }
    buf
}

fn decode_archive(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut pos = 0;
    let mut out = Vec::new();
    if bytes.len() < 4 {
        return out;
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    pos += 4;
    for _ in 0..count {
        let path_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let path = String::from_utf8_lossy(&bytes[pos..pos + path_len]).to_string();
        pos += path_len;
        let content_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let content = bytes[pos..pos + content_len].to_vec();
        pos += content_len;
        out.push((path, content));
    }
    out
}

#[async_trait]
impl Session for StubSession {
    async fn run(&self, cmd: &str, _timeout: Option<Duration>) -> Result<CommandOutput, DeploymentError> {
        let (exit_code, stdout, stderr) = self.execute(cmd);
        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    async fn exec(&self, cmd: &str) -> Result<String, DeploymentError> {
        let out = self.run(cmd, None).await?;
        if !out.success() {
            return Err(DeploymentError::RemoteExecError {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        Ok(out.stdout)
    }

    async fn exec_ok(&self, cmd: &str) -> Result<bool, DeploymentError> {
        Ok(self.run(cmd, None).await?.success())
    }

    async fn exists(&self, path: &str) -> Result<bool, DeploymentError> {
        Ok(self.fs.lock().unwrap().contains_key(path))
    }

    async fn upload(&self, bytes: &[u8], path: &str, _mode: u32) -> Result<(), DeploymentError> {
        if let Some(parent) = path.rsplit_once('/').map(|(p, _)| p) {
            self.mkdir_p(parent);
        }
        self.fs
            .lock()
            .unwrap()
            .insert(path.to_string(), Entry::File(bytes.to_vec()));
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, DeploymentError> {
        match self.fs.lock().unwrap().get(path) {
            Some(Entry::File(bytes)) => Ok(bytes.clone()),
            _ => Err(DeploymentError::RemoteExecError {
                exit_code: 1,
                stderr: format!("no such file: {path}"),
            }),
        }
    }

    async fn write_text_file(&self, path: &str, content: &str) -> Result<(), DeploymentError> {
        self.upload(content.as_bytes(), path, 0o644).await
    }

    async fn sudo_exec(&self, cmd: &str) -> Result<String, DeploymentError> {
        self.exec(cmd).await
    }

    async fn sudo_exec_with_password(
        &self,
        cmd: &str,
        _password: Option<&str>,
    ) -> Result<String, DeploymentError> {
        self.exec(cmd).await
    }

    async fn atomic_symlink(&self, target: &str, link: &str) -> Result<(), DeploymentError> {
        self.fs
            .lock()
            .unwrap()
            .insert(link.to_string(), Entry::Symlink(target.to_string()));
        Ok(())
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn user(&self) -> &str {
        &self.user
    }
}
