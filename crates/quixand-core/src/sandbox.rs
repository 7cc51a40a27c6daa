//! The user-visible Sandbox Facade: construction eagerly creates the
//! backing container, and every operation routes through an
//! [`DockerAdapter`]. Grounded in `quixand/core/sandbox.py::Sandbox` and
//! `FilesFacade`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::adapter::DockerAdapter;
use crate::config::{Config, Resources};
use crate::error::{QuixandError, Result};
use crate::model::{CommandResult, Execution, FileInfo, SandboxHandle, SandboxStatus, SandboxState, VolumeMount};
use crate::proxy::ProxyFacade;
use crate::runtime;

/// Input to [`Sandbox::create`], grounded in
/// `quixand/adapters/base.py::SandboxConfig` as re-exposed by
/// `Sandbox.__init__`'s keyword arguments.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub template: Option<String>,
    pub timeout: Option<u64>,
    pub metadata: Option<serde_json::Value>,
    pub env: HashMap<String, String>,
    pub workdir: Option<String>,
    pub adapter: Option<String>,
    pub resources: Option<Resources>,
    pub volumes: Vec<VolumeMount>,
}

/// Namespaced filesystem operations, matching `FilesFacade`.
pub struct FilesFacade {
    adapter: Arc<DockerAdapter>,
    handle: SandboxHandle,
}

impl FilesFacade {
    pub async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.adapter.fs_write(&self.handle, path, data).await
    }

    pub async fn write_text(&self, path: &str, data: &str) -> Result<()> {
        self.write(path, data.as_bytes()).await
    }

    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        self.adapter.fs_read(&self.handle, path).await
    }

    pub async fn read_text(&self, path: &str) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read(path).await?).into_owned())
    }

    pub async fn ls(&self, path: &str) -> Result<Vec<FileInfo>> {
        self.adapter.fs_ls(&self.handle, path).await
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.adapter.fs_mkdir(&self.handle, path).await
    }

    pub async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        self.adapter.fs_rm(&self.handle, path, recursive).await
    }

    pub async fn mv(&self, src: &str, dest: &str) -> Result<()> {
        self.adapter.fs_mv(&self.handle, src, dest).await
    }

    /// Supplemental: shell-glob expansion, dropped by the distillation but
    /// present in the original (`FilesFacade.glob`) and cheap to keep since
    /// it composes directly on top of `run`.
    pub async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        self.adapter.glob(&self.handle, pattern).await
    }

    pub async fn put(&self, local: &str, remote: &str) -> Result<()> {
        self.adapter.fs_put(&self.handle, local, remote).await
    }

    pub async fn get(&self, remote: &str, local: &str) -> Result<()> {
        self.adapter.fs_get(&self.handle, remote, local).await
    }
}

pub struct Sandbox {
    adapter: Arc<DockerAdapter>,
    handle: SandboxHandle,
    closed: AtomicBool,
    /// Whether a bare `drop` (no explicit `shutdown()`) should tear the
    /// sandbox down. Only `true` for handles returned by [`Sandbox::create`]
    /// - see the Open Question resolution on `connect`'s drop behavior in
    /// DESIGN.md.
    owns_lifecycle: bool,
    pub files: FilesFacade,
    pub proxy: ProxyFacade,
}

impl Sandbox {
    /// Creates a new sandbox: connects to the configured runtime, starts a
    /// long-lived container, persists the handle, and spawns a detached
    /// Watchdog (unless `QS_DISABLE_WATCHDOG` is set).
    pub async fn create(config: SandboxConfig) -> Result<Self> {
        let mut base = Config::from_env();
        if let Some(adapter_name) = &config.adapter {
            base.adapter = adapter_name.clone();
        }
        base.ensure_root_dirs()?;

        let image = config.template.clone().unwrap_or_else(|| base.image.clone());
        let workdir = config.workdir.clone().unwrap_or_else(|| "/workspace".to_string());
        let timeout_seconds = config.timeout.unwrap_or(base.timeout_seconds);
        let metadata = config.metadata.clone().unwrap_or_else(|| base.metadata.clone());

        let rt = runtime::connect(&base.runtime).await?;
        let adapter = Arc::new(DockerAdapter::new(rt, base));

        let id = Uuid::new_v4().to_string();
        let handle = adapter
            .create(
                &id,
                &image,
                &workdir,
                config.env,
                config.volumes,
                config.resources,
                timeout_seconds,
                metadata,
            )
            .await?;

        Ok(Sandbox::from_parts(adapter, handle, true))
    }

    /// Reattaches to an already-running sandbox by id, looking it up in
    /// the State Store - matches `Sandbox`/`LocalDockerAdapter.connect`,
    /// used by the CLI's `sandbox connect` subcommand. A sandbox obtained
    /// this way is never auto-shut-down on drop (only an explicit
    /// `shutdown()` call tears it down) - see DESIGN.md's Open Question
    /// resolution: the original's `lifecycle.connect()` builds its Sandbox
    /// via `object.__new__`, skipping `__init__`, so its `_closed` attribute
    /// is never set and `__del__`'s `self.shutdown()` call raises and is
    /// swallowed - connected sandboxes never actually get torn down when a
    /// short-lived process (e.g. this crate's CLI) drops its handle.
    pub async fn connect(id: &str) -> Result<Self> {
        let base = Config::from_env();
        let rt = runtime::connect(&base.runtime).await?;
        let adapter = Arc::new(DockerAdapter::new(rt, base));
        let handle = adapter.connect(id)?;
        Ok(Sandbox::from_parts(adapter, handle, false))
    }

    fn from_parts(adapter: Arc<DockerAdapter>, handle: SandboxHandle, owns_lifecycle: bool) -> Self {
        let files = FilesFacade {
            adapter: adapter.clone(),
            handle: handle.clone(),
        };
        let proxy = ProxyFacade::new(adapter.clone(), handle.clone());
        Sandbox {
            adapter,
            handle,
            closed: AtomicBool::new(false),
            owns_lifecycle,
            files,
            proxy,
        }
    }

    pub fn id(&self) -> &str {
        &self.handle.id
    }

    pub fn container_id(&self) -> &str {
        &self.handle.container_id
    }

    pub async fn status(&self) -> Result<SandboxStatus> {
        let handle = self.current_handle()?;
        let info = self.adapter.runtime().get_container_info(&handle.container_id).await;
        let state = match info {
            Ok(info) => map_container_state(info.state),
            Err(QuixandError::NotFound(_)) => SandboxState::Stopped,
            Err(_) => SandboxState::Error,
        };
        let uptime_seconds = Some((chrono::Utc::now() - handle.created_at).num_seconds());
        let timeout_at = handle.last_active_at + chrono::Duration::seconds(handle.timeout_seconds as i64);
        Ok(SandboxStatus {
            state,
            container_id: handle.container_id,
            uptime_seconds,
            timeout_at,
        })
    }

    pub async fn refresh_timeout(&self, seconds: u64) -> Result<()> {
        let mut handle = self.current_handle()?;
        handle.timeout_seconds = seconds;
        self.adapter.refresh_timeout(&handle).await
    }

    /// Idempotent: a second call is a no-op, matching `Sandbox.shutdown`'s
    /// `self._closed` guard.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.adapter.shutdown(&self.handle).await
    }

    pub async fn run(
        &self,
        cmd: &str,
        timeout: Option<u64>,
        env: Option<HashMap<String, String>>,
    ) -> Result<CommandResult> {
        self.adapter.run(&self.handle, cmd, env, timeout).await
    }

    /// Writes `source` to a scratch file inside the workdir and executes
    /// it with the template's interpreter (`python`, matching the
    /// original's Python-centric default images).
    pub async fn run_code(&self, source: &str) -> Result<Execution> {
        let script_path = ".qs_exec.py";
        self.files.write_text(script_path, source).await?;
        let result = self.run(&format!("python {script_path}"), None, None).await?;
        Ok(Execution {
            text: result.text,
            images: None,
            files: None,
            stderr: result.stderr,
            ok: result.ok(),
        })
    }

    /// Runs the interpreter's package manager inside the container.
    pub async fn install_pkg(&self, spec: &str) -> Result<CommandResult> {
        self.run(&format!("python -m pip install --no-input {spec}"), None, None)
            .await
    }

    /// Opens an interactive PTY session running `command` inside the
    /// container, backed by a reader/writer thread pair (see
    /// [`crate::pty::PtyHandle`]).
    pub async fn pty(&self, command: &str) -> Result<crate::pty::PtyHandle> {
        let session = self
            .adapter
            .runtime()
            .create_pty_session(&self.handle.container_id, command, None)
            .await?;
        let exec_id = session
            .exec_id
            .ok_or_else(|| QuixandError::Unknown("pty session has no exec id".to_string()))?;
        self.adapter.runtime().attach_pty(&exec_id).await
    }

    /// Present in the original as a documented no-op: the design is
    /// bind-mount/exec based specifically to avoid host-side port
    /// publishing (see the Proxy's rationale), so this returns
    /// `Unsupported` rather than silently doing nothing.
    pub fn expose(&self, _port: u16, _host_port: Option<u16>, _proto: &str) -> Result<()> {
        Err(QuixandError::Unknown(
            "expose() is unsupported: the sandbox never publishes container ports to the host, use proxy instead".to_string(),
        ))
    }

    fn current_handle(&self) -> Result<SandboxHandle> {
        self.adapter
            .store()
            .get(&self.handle.id)
            .ok_or_else(|| QuixandError::NotFound(format!("sandbox {} not found", self.handle.id)))
    }

    /// Returns a guard whose `Drop` calls `shutdown()` synchronously, the
    /// idiomatic substitute for Python's `__enter__`/`__exit__` and
    /// `__del__` best-effort cleanup - see DESIGN.md's Open Question on
    /// this.
    pub fn scoped(self) -> ScopedSandbox {
        ScopedSandbox { inner: Some(self) }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) || !self.owns_lifecycle {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let adapter = self.adapter.clone();
            let sandbox_handle = self.handle.clone();
            handle.spawn(async move {
                if let Err(e) = adapter.shutdown(&sandbox_handle).await {
                    log::warn!("best-effort drop cleanup failed: {e}");
                }
            });
        } else {
            log::warn!(
                "sandbox {} dropped outside a tokio runtime; relying on the Watchdog for cleanup",
                self.handle.id
            );
        }
    }
}

pub struct ScopedSandbox {
    inner: Option<Sandbox>,
}

impl std::ops::Deref for ScopedSandbox {
    type Target = Sandbox;
    fn deref(&self) -> &Sandbox {
        self.inner.as_ref().expect("scoped sandbox used after drop")
    }
}

impl Drop for ScopedSandbox {
    fn drop(&mut self) {
        if let Some(sandbox) = self.inner.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = sandbox.shutdown().await;
                });
            }
        }
    }
}

fn map_container_state(state: crate::model::ContainerState) -> SandboxState {
    use crate::model::ContainerState as C;
    match state {
        C::Created => SandboxState::Creating,
        C::Running | C::Paused => SandboxState::Running,
        C::Removing => SandboxState::Stopping,
        C::Stopped | C::Exited | C::Dead => SandboxState::Stopped,
        C::Error => SandboxState::Error,
    }
}
