//! Binds a [`SandboxHandle`] to a [`Runtime`], exposing the filesystem and
//! process operations the Sandbox Facade calls. Grounded in
//! `quixand/adapters/local_docker.py::LocalDockerAdapter`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use crate::config::Config;
use crate::error::{QuixandError, Result};
use crate::model::{
    CommandResult, ContainerConfig, ExecConfig, FileInfo, SandboxHandle, VolumeMount,
};
use crate::runtime::Runtime;
use crate::state_store::StateStore;

pub const ADAPTER_NAME: &str = "local-docker";

pub struct DockerAdapter {
    runtime: Arc<dyn Runtime>,
    store: StateStore,
    config: Config,
}

fn bash_quote(s: &str) -> String {
    let quoted = shell_quote::Bash::quote_vec(s.as_bytes());
    String::from_utf8_lossy(&quoted).to_string()
}

impl DockerAdapter {
    pub fn new(runtime: Arc<dyn Runtime>, config: Config) -> Self {
        let store = StateStore::new(config.state_file());
        DockerAdapter {
            runtime,
            store,
            config,
        }
    }

    /// Resolves `path` against the handle's workdir when it is not already
    /// absolute, matching `LocalDockerAdapter._abs`.
    fn resolve_path(handle: &SandboxHandle, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", handle.workdir.trim_end_matches('/'), path)
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Creates a new backing container and persists its handle, spawning a
    /// detached watchdog process unless `QS_DISABLE_WATCHDOG` is set.
    /// The container is kept alive with `sleep infinity` under a forced
    /// `/bin/sh` entrypoint - the sandbox's own workload runs via `exec`,
    /// not as the container's PID 1 - matching `LocalDockerAdapter.create`.
    pub async fn create(
        &self,
        id: &str,
        image: &str,
        workdir: &str,
        env: HashMap<String, String>,
        mut volumes: Vec<VolumeMount>,
        resources: Option<crate::config::Resources>,
        timeout_seconds: u64,
        metadata: serde_json::Value,
    ) -> Result<SandboxHandle> {
        let volume_dir = self.ensure_volume_dir(id)?;
        volumes.push(VolumeMount {
            source: volume_dir.to_string_lossy().to_string(),
            target: workdir.to_string(),
            read_only: false,
            r#type: "bind".to_string(),
        });

        let container_config = ContainerConfig {
            name: format!("qs-{id}"),
            image: image.to_string(),
            workdir: workdir.to_string(),
            env,
            volumes,
            resources,
            entrypoint: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
            command: Some(vec!["sleep infinity".to_string()]),
            labels: HashMap::from([("quixand.sandbox".to_string(), id.to_string())]),
            ports: HashMap::new(),
        };

        let container_id = self.runtime.create_container(&container_config).await?;
        self.runtime.start_container(&container_id).await?;

        let now = Utc::now();
        let handle = SandboxHandle {
            id: id.to_string(),
            container_id,
            runtime: self.config.runtime.clone(),
            workdir: workdir.to_string(),
            created_at: now,
            last_active_at: now,
            timeout_seconds,
            metadata,
            adapter: ADAPTER_NAME.to_string(),
        };
        self.store.put(handle.clone())?;

        if !self.config.disable_watchdog {
            self.spawn_watchdog(&handle.id)?;
        }

        Ok(handle)
    }

    fn spawn_watchdog(&self, sandbox_id: &str) -> Result<()> {
        let exe = std::env::var("QS_WATCHDOG_BIN").unwrap_or_else(|_| "quixand-watchdog".to_string());
        let mut cmd = std::process::Command::new(exe);
        cmd.arg(sandbox_id);
        cmd.env("QS_ROOT", &self.config.root);
        crate::children::spawn_detached(cmd)
            .map_err(|e| QuixandError::Unknown(format!("failed to spawn watchdog: {e}")))?;
        Ok(())
    }

    pub fn connect(&self, id: &str) -> Result<SandboxHandle> {
        self.store
            .get(id)
            .ok_or_else(|| QuixandError::NotFound(format!("no sandbox with id {id}")))
    }

    pub async fn shutdown(&self, handle: &SandboxHandle) -> Result<()> {
        if let Err(e) = self.runtime.stop_container(&handle.container_id, 10).await {
            log::warn!("stop_container failed during shutdown of {}: {e}", handle.id);
        }
        if let Err(e) = self.runtime.remove_container(&handle.container_id, true).await {
            log::warn!("remove_container failed during shutdown of {}: {e}", handle.id);
        }
        self.store.remove(&handle.id)?;
        self.cleanup_host_dirs(&handle.id);
        Ok(())
    }

    /// Removes the per-sandbox scratch and volume directories. Exposed so
    /// callers that clean up state without going through `shutdown` (the
    /// Watchdog's "container already gone" branch) can still reclaim the
    /// host-side directories, per spec.md §4.4 step 5.
    pub fn cleanup_host_dirs(&self, id: &str) {
        for dir in [self.scratch_dir(id), self.volume_dir(id)] {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("failed to remove {} for {id}: {e}", dir.display());
                }
            }
        }
    }

    fn scratch_dir(&self, id: &str) -> std::path::PathBuf {
        self.config.root.join("scratch").join(id)
    }

    fn volume_dir(&self, id: &str) -> std::path::PathBuf {
        self.config.root.join("volumes").join(id)
    }

    fn ensure_volume_dir(&self, id: &str) -> Result<std::path::PathBuf> {
        let dir = self.volume_dir(id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub async fn refresh_timeout(&self, handle: &SandboxHandle) -> Result<()> {
        self.store.touch(&handle.id, Utc::now())
    }

    fn touch(&self, id: &str) {
        if let Err(e) = self.store.touch(id, Utc::now()) {
            log::warn!("failed to update last_active_at for {id}: {e}");
        }
    }

    pub async fn run(
        &self,
        handle: &SandboxHandle,
        cmd: &str,
        env: Option<HashMap<String, String>>,
        timeout_seconds: Option<u64>,
    ) -> Result<CommandResult> {
        self.touch(&handle.id);

        let exec_config = ExecConfig {
            command: vec!["/bin/sh".to_string(), "-lc".to_string(), cmd.to_string()],
            env,
            workdir: Some(handle.workdir.clone()),
            user: None,
            privileged: false,
            tty: false,
            stdin: false,
            detach: false,
        };

        let timeout = timeout_seconds.unwrap_or(self.config.timeout_seconds);
        let result = self
            .runtime
            .exec_in_container(&handle.container_id, &exec_config, Some(timeout))
            .await
            .map_err(|e| match e {
                QuixandError::Timeout(d) => QuixandError::Timeout(d),
                other => other,
            })?;

        let stdout = String::from_utf8_lossy(&result.stdout).to_string();
        let stderr = String::from_utf8_lossy(&result.stderr).to_string();
        Ok(CommandResult {
            text: stdout.clone(),
            stdout,
            stderr,
            exit_code: result.exit_code,
            duration_seconds: result.duration_seconds,
        })
    }

    pub async fn fs_write(&self, handle: &SandboxHandle, path: &str, content: &[u8]) -> Result<()> {
        self.touch(&handle.id);
        let abs_path = Self::resolve_path(handle, path);
        let scratch = self.ensure_scratch_dir(&handle.id)?;
        let tmp_path = scratch.join(
            Path::new(&abs_path)
                .file_name()
                .ok_or_else(|| QuixandError::FilesystemError(format!("invalid path {path}")))?,
        );
        std::fs::write(&tmp_path, content)?;
        self.runtime
            .copy_to_container(&handle.container_id, &tmp_path.to_string_lossy(), &abs_path)
            .await
    }

    pub async fn fs_read(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<u8>> {
        self.touch(&handle.id);
        let abs_path = Self::resolve_path(handle, path);
        let scratch = self.ensure_scratch_dir(&handle.id)?;
        let name = Path::new(&abs_path)
            .file_name()
            .ok_or_else(|| QuixandError::FilesystemError(format!("invalid path {path}")))?;
        let dest = scratch.join(name);
        self.runtime
            .copy_from_container(&handle.container_id, &abs_path, &dest.to_string_lossy())
            .await?;
        Ok(std::fs::read(&dest)?)
    }

    /// Copies a host-side file or directory straight into the container at
    /// `remote`, without staging through bytes in memory - the direct
    /// counterpart to `fs_write`/`fs_read`'s in-memory round-trip, grounded
    /// in `LocalDockerAdapter.fs_put`.
    pub async fn fs_put(&self, handle: &SandboxHandle, local: &str, remote: &str) -> Result<()> {
        self.touch(&handle.id);
        let abs_path = Self::resolve_path(handle, remote);
        self.runtime
            .copy_to_container(&handle.container_id, local, &abs_path)
            .await
    }

    pub async fn fs_get(&self, handle: &SandboxHandle, remote: &str, local: &str) -> Result<()> {
        self.touch(&handle.id);
        let abs_path = Self::resolve_path(handle, remote);
        self.runtime
            .copy_from_container(&handle.container_id, &abs_path, local)
            .await
    }

    /// Parses the exact output of `ls -la --time-style=+%s`: the header
    /// line (`total N`) is skipped, `size` is field 4, `mtime` is field 5
    /// as a unix timestamp, directory-ness is column 0 starting with `d`,
    /// and the name is the last whitespace-separated field - this mirrors
    /// `LocalDockerAdapter.fs_ls` field-for-field, including its
    /// `len(parts) >= 7` guard against malformed lines (symlink arrows
    /// insert extra tokens that this adapter does not special-case).
    pub async fn fs_ls(&self, handle: &SandboxHandle, path: &str) -> Result<Vec<FileInfo>> {
        self.touch(&handle.id);
        let abs_path = Self::resolve_path(handle, path);
        let result = self
            .run(
                handle,
                &format!("ls -la --time-style=+%s {}", bash_quote(&abs_path)),
                None,
                Some(30),
            )
            .await?;

        if !result.ok() {
            return Err(QuixandError::FilesystemError(format!(
                "ls failed for {path}: {}",
                result.stderr
            )));
        }

        let mut entries = Vec::new();
        for line in result.stdout.lines().skip(1) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 7 {
                continue;
            }
            let is_dir = line.starts_with('d');
            let size: u64 = parts[4].parse().unwrap_or(0);
            let mtime: i64 = parts[5].parse().unwrap_or(0);
            let name = parts[parts.len() - 1].to_string();
            if name == "." || name == ".." {
                continue;
            }
            entries.push(FileInfo {
                path: name,
                size,
                is_dir,
                modified_at: Utc.timestamp_opt(mtime, 0).single(),
            });
        }
        Ok(entries)
    }

    pub async fn fs_mkdir(&self, handle: &SandboxHandle, path: &str) -> Result<()> {
        let abs_path = Self::resolve_path(handle, path);
        self.run(handle, &format!("mkdir -p {}", bash_quote(&abs_path)), None, Some(10))
            .await?;
        Ok(())
    }

    pub async fn fs_rm(&self, handle: &SandboxHandle, path: &str, recursive: bool) -> Result<()> {
        let abs_path = Self::resolve_path(handle, path);
        let flag = if recursive { "-rf" } else { "-f" };
        self.run(handle, &format!("rm {flag} {}", bash_quote(&abs_path)), None, Some(10))
            .await?;
        Ok(())
    }

    pub async fn fs_mv(&self, handle: &SandboxHandle, src: &str, dest: &str) -> Result<()> {
        let abs_src = Self::resolve_path(handle, src);
        let abs_dest = Self::resolve_path(handle, dest);
        self.run(
            handle,
            &format!("mv {} {}", bash_quote(&abs_src), bash_quote(&abs_dest)),
            None,
            Some(10),
        )
        .await?;
        Ok(())
    }

    /// Shell-expands `pattern` inside the container via `printf` (not `ls
    /// -1d`, which fails on a pattern with no matches) and returns the
    /// matching paths, one per line - grounded in
    /// `FilesFacade.glob`.
    pub async fn glob(&self, handle: &SandboxHandle, pattern: &str) -> Result<Vec<String>> {
        let result = self
            .run(
                handle,
                &format!("printf '%s\\n' {pattern}"),
                None,
                Some(10),
            )
            .await?;
        Ok(result
            .stdout
            .lines()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    fn ensure_scratch_dir(&self, id: &str) -> Result<std::path::PathBuf> {
        let dir = self.scratch_dir(id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
