//! Docker backend: a thin, reusable wrapper around a single `bollard::Docker`
//! client, following `engine/process_execution/docker/src/docker.rs`'s
//! `DockerOnceCell`/`CommandRunner` split almost exactly - one long-lived
//! client, exec-create-then-start for commands, streamed logs collected
//! into `ExecResult`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as BollardContainerConfig, CreateContainerOptions, DownloadFromContainerOptions,
    InspectContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StopContainerOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;

use crate::error::{QuixandError, Result};
use crate::model::{ContainerConfig, ContainerInfo, ContainerState, ExecConfig, ExecResult};

use super::{PtySession, Runtime};

/// Minimum Docker Engine API version we rely on for exec streaming and
/// the container-wait endpoint; matches the floor the teacher's backend
/// checks for at connect time.
const MIN_API_VERSION: &str = "1.41";

/// Which knob a backend uses to express fractional CPU cores. Dockerd
/// accepts an absolute `NanoCpus` value; Podman's rootless socket rejects
/// it and wants `CpuShares`, a weight relative to the default of 1024 -
/// see spec §4.1's resource-translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CpuLimitMode {
    NanoCpus,
    Shares,
}

pub struct DockerRuntime {
    client: Docker,
    cpu_mode: CpuLimitMode,
}

impl DockerRuntime {
    pub async fn connect() -> Result<Self> {
        let client = if let Ok(host) = std::env::var("DOCKER_HOST") {
            Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| QuixandError::RuntimeUnavailable(e.to_string()))?
        } else {
            Docker::connect_with_local_defaults()
                .map_err(|e| QuixandError::RuntimeUnavailable(e.to_string()))?
        };

        let version = client
            .version()
            .await
            .map_err(|e| QuixandError::RuntimeUnavailable(e.to_string()))?;
        if let Some(v) = version.api_version {
            if v.as_str() < MIN_API_VERSION {
                log::warn!("docker API version {v} is older than the tested floor {MIN_API_VERSION}");
            }
        }

        Ok(DockerRuntime {
            client,
            cpu_mode: CpuLimitMode::NanoCpus,
        })
    }

    pub(crate) fn from_client(client: Docker) -> Self {
        DockerRuntime {
            client,
            cpu_mode: CpuLimitMode::NanoCpus,
        }
    }

    pub(crate) fn with_cpu_mode(client: Docker, cpu_mode: CpuLimitMode) -> Self {
        DockerRuntime { client, cpu_mode }
    }

    pub(crate) fn client(&self) -> &Docker {
        &self.client
    }

    fn build_host_config(&self, config: &ContainerConfig) -> HostConfig {
        let binds: Vec<String> = config
            .volumes
            .iter()
            .map(|v| {
                format!(
                    "{}:{}{}",
                    v.source,
                    v.target,
                    if v.read_only { ":ro" } else { "" }
                )
            })
            .collect();

        let cpu_cores = config.resources.as_ref().and_then(|r| r.cpu_limit);
        let (nano_cpus, cpu_shares) = match (self.cpu_mode, cpu_cores) {
            (CpuLimitMode::NanoCpus, Some(cores)) => (Some((cores * 1_000_000_000.0) as i64), None),
            (CpuLimitMode::Shares, Some(cores)) => (None, Some((cores * 1024.0).round() as i64)),
            (_, None) => (None, None),
        };

        let memory = config
            .resources
            .as_ref()
            .and_then(|r| r.mem_limit.as_ref())
            .and_then(|m| parse_mem_limit(m));

        let pids_limit = config
            .resources
            .as_ref()
            .and_then(|r| r.pids_limit)
            .map(|p| p as i64);

        let network_mode = config.resources.as_ref().map(|r| match r.network {
            crate::config::NetworkMode::Bridge => "bridge".to_string(),
            crate::config::NetworkMode::Host => "host".to_string(),
            crate::config::NetworkMode::None => "none".to_string(),
        });

        let port_bindings = build_port_bindings(&config.ports);

        HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            nano_cpus,
            cpu_shares,
            memory,
            pids_limit,
            network_mode,
            port_bindings,
            init: Some(true),
            ..Default::default()
        }
    }
}

/// Maps spec.md §3's container->host port table onto bollard's
/// `container_port/proto -> [{host_ip, host_port}]` shape. Unused by
/// `DockerAdapter::create` today (sandboxes avoid host-side port publishing
/// by design, see the Proxy rationale in DESIGN.md) but the `Runtime`
/// contract honors it for any caller that does populate `ContainerConfig.ports`.
fn build_port_bindings(
    ports: &HashMap<String, u16>,
) -> Option<HashMap<String, Option<Vec<bollard::models::PortBinding>>>> {
    if ports.is_empty() {
        return None;
    }
    Some(
        ports
            .iter()
            .map(|(container_port, host_port)| {
                (
                    format!("{container_port}/tcp"),
                    Some(vec![bollard::models::PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect(),
    )
}

fn parse_mem_limit(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (num, mult): (&str, i64) = if let Some(stripped) = raw.strip_suffix('g').or_else(|| raw.strip_suffix('G')) {
        (stripped, 1 << 30)
    } else if let Some(stripped) = raw.strip_suffix('m').or_else(|| raw.strip_suffix('M')) {
        (stripped, 1 << 20)
    } else if let Some(stripped) = raw.strip_suffix('k').or_else(|| raw.strip_suffix('K')) {
        (stripped, 1 << 10)
    } else {
        (raw, 1)
    };
    num.trim().parse::<f64>().ok().map(|n| (n * mult as f64) as i64)
}

fn map_state(state: &str) -> ContainerState {
    match state {
        "created" => ContainerState::Created,
        "running" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        "restarting" => ContainerState::Running,
        "removing" => ContainerState::Removing,
        "exited" => ContainerState::Exited,
        "dead" => ContainerState::Dead,
        _ => ContainerState::Error,
    }
}

fn parse_docker_time(raw: &str) -> Option<DateTime<Utc>> {
    if raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        self.ensure_image(&config.image).await?;

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = config
            .ports
            .keys()
            .map(|p| (format!("{p}/tcp"), HashMap::new()))
            .collect();

        let bollard_config = BollardContainerConfig {
            image: Some(config.image.clone()),
            working_dir: Some(config.workdir.clone()),
            env: Some(env),
            entrypoint: config.entrypoint.clone(),
            cmd: config.command.clone(),
            labels: Some(config.labels.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(self.build_host_config(config)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), bollard_config)
            .await?;
        Ok(response.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.client
            .start_container::<String>(container_id, None)
            .await?;
        Ok(())
    }

    /// Idempotent per spec.md §4.1: stopping an already-gone container is
    /// success, not `NotFound`.
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };
        match self.client.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent per spec.md §4.1: removing an already-gone container is
    /// success, not `NotFound`.
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };
        match self.client.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let info = self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;

        let state = info.state.as_ref();
        let container_state = state
            .and_then(|s| s.status.as_ref())
            .map(|s| map_state(&s.to_string().to_lowercase()))
            .unwrap_or(ContainerState::Error);

        let created_at = info
            .created
            .as_deref()
            .and_then(parse_docker_time)
            .unwrap_or_else(Utc::now);
        let started_at = state.and_then(|s| s.started_at.as_deref()).and_then(parse_docker_time);
        let finished_at = state.and_then(|s| s.finished_at.as_deref()).and_then(parse_docker_time);
        let exit_code = state.and_then(|s| s.exit_code);

        Ok(ContainerInfo {
            id: info.id.unwrap_or_else(|| container_id.to_string()),
            name: info.name.unwrap_or_default().trim_start_matches('/').to_string(),
            state: container_state,
            created_at,
            started_at,
            finished_at,
            exit_code,
            labels: info
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
        })
    }

    async fn container_exists(&self, container_id: &str) -> Result<bool> {
        match self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exec_in_container(
        &self,
        container_id: &str,
        config: &ExecConfig,
        timeout_secs: Option<u64>,
    ) -> Result<ExecResult> {
        let env: Option<Vec<String>> = config
            .env
            .as_ref()
            .map(|env| env.iter().map(|(k, v)| format!("{k}={v}")).collect());

        let exec_options = CreateExecOptions {
            cmd: Some(config.command.clone()),
            env,
            working_dir: config.workdir.clone(),
            user: config.user.clone(),
            privileged: Some(config.privileged),
            tty: Some(config.tty),
            attach_stdin: Some(config.stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let exec = self.client.create_exec(container_id, exec_options).await?;

        let run = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();

            if let StartExecResults::Attached { mut output, .. } =
                self.client.start_exec(&exec.id, None).await?
            {
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        LogOutput::Console { message } => stdout.extend_from_slice(&message),
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }

            let inspect = self.client.inspect_exec(&exec.id).await?;
            let exit_code = inspect.exit_code.unwrap_or(-1);

            Ok::<_, QuixandError>(ExecResult {
                exit_code,
                stdout,
                stderr,
                duration_seconds: started.elapsed().as_secs_f64(),
            })
        };

        match timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
                .await
                .map_err(|_| QuixandError::Timeout(Duration::from_secs(secs)))?,
            None => run.await,
        }
    }

    /// Uploads `source` into the container at exactly `dest`. For a single
    /// file whose basename differs from `dest`'s, the tar entry is built
    /// under `dest`'s basename and extracted into `dest`'s parent directory
    /// rather than `dest` itself, so the file lands with the requested name
    /// instead of its original one - the rename spec.md §4.1 calls for.
    async fn copy_to_container(&self, container_id: &str, source: &str, dest: &str) -> Result<()> {
        let source_path = std::path::Path::new(source);
        let dest_path = std::path::Path::new(dest);

        let (tar_bytes, extract_path) = if source_path.is_dir() {
            (tar_directory(source_path)?, dest.to_string())
        } else {
            let basename = dest_path.file_name().ok_or_else(|| {
                QuixandError::FilesystemError(format!("invalid destination path {dest}"))
            })?;
            let tar_bytes = tar_single_file(source_path, basename)?;
            let parent = non_empty_parent(dest_path);
            (tar_bytes, parent.to_string_lossy().to_string())
        };

        let options = UploadToContainerOptions {
            path: extract_path,
            no_overwrite_dir_non_dir: "false".to_string(),
        };
        self.client
            .upload_to_container(container_id, Some(options), tar_bytes.into())
            .await?;
        Ok(())
    }

    async fn copy_from_container(
        &self,
        container_id: &str,
        source: &str,
        dest: &str,
    ) -> Result<()> {
        let options = DownloadFromContainerOptions {
            path: source.to_string(),
        };
        let mut stream = self.client.download_from_container(container_id, Some(options));
        let mut archive_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive_bytes.extend_from_slice(&chunk?);
        }
        untar_into(&archive_bytes, dest)
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        let summaries = self.client.list_containers(Some(options)).await?;
        let mut infos = Vec::with_capacity(summaries.len());
        for s in summaries {
            if let Some(id) = &s.id {
                infos.push(self.get_container_info(id).await?);
            }
        }
        Ok(infos)
    }

    async fn get_container_logs(
        &self,
        container_id: &str,
        stdout: bool,
        stderr: bool,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        tail: Option<usize>,
    ) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout,
            stderr,
            since: since.map(|d| d.timestamp()).unwrap_or(0),
            until: until.map(|d| d.timestamp()).unwrap_or(0),
            tail: tail.map(|t| t.to_string()).unwrap_or_else(|| "all".to_string()),
            timestamps: false,
            ..Default::default()
        };
        let mut stream = self.client.logs(container_id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    out.push_str(&String::from_utf8_lossy(&message))
                }
                LogOutput::StdErr { message } => out.push_str(&String::from_utf8_lossy(&message)),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(out)
    }

    async fn wait_container(&self, container_id: &str, timeout_secs: Option<u64>) -> Result<i64> {
        let run = async {
            let mut stream = self
                .client
                .wait_container(container_id, None::<WaitContainerOptions<String>>);
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                Some(Err(e)) => Err(e.into()),
                None => Ok(0),
            }
        };
        match timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
                .await
                .map_err(|_| QuixandError::Timeout(Duration::from_secs(secs)))?,
            None => run.await,
        }
    }

    async fn create_pty_session(
        &self,
        container_id: &str,
        command: &str,
        env: Option<&HashMap<String, String>>,
    ) -> Result<PtySession> {
        let env_vec: Option<Vec<String>> =
            env.map(|e| e.iter().map(|(k, v)| format!("{k}={v}")).collect());

        let exec_options = CreateExecOptions {
            cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()]),
            env: env_vec,
            tty: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self.client.create_exec(container_id, exec_options).await?;
        Ok(PtySession {
            container_id: container_id.to_string(),
            exec_id: Some(exec.id),
        })
    }

    async fn attach_pty(&self, exec_id: &str) -> Result<crate::pty::PtyHandle> {
        crate::pty::PtyHandle::spawn(
            tokio::runtime::Handle::current(),
            self.client.clone(),
            exec_id.to_string(),
        )
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        let list_options = ListImagesOptions::<String> {
            all: false,
            filters: HashMap::from([("reference".to_string(), vec![image.to_string()])]),
            ..Default::default()
        };
        let existing = self.client.list_images(Some(list_options)).await?;
        if !existing.is_empty() {
            return Ok(());
        }

        log::debug!("pulling image {image}");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                return Err(QuixandError::ImageUnavailable(e.to_string()));
            }
        }
        Ok(())
    }
}

/// Walks a directory recursively into a tar archive rooted at `.`, matching
/// `docker cp`'s directory-upload semantics.
fn tar_directory(path: &std::path::Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", path)
        .map_err(|e| QuixandError::FilesystemError(e.to_string()))?;
    builder
        .into_inner()
        .map_err(|e| QuixandError::FilesystemError(e.to_string()))
}

/// Wraps a single file as a tar archive whose sole entry is named `name`,
/// regardless of the file's own basename on the host side.
fn tar_single_file(path: &std::path::Path, name: &std::ffi::OsStr) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut file = std::fs::File::open(path)?;
    builder
        .append_file(name, &mut file)
        .map_err(|e| QuixandError::FilesystemError(e.to_string()))?;
    builder
        .into_inner()
        .map_err(|e| QuixandError::FilesystemError(e.to_string()))
}

fn non_empty_parent(path: &std::path::Path) -> &std::path::Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => std::path::Path::new("."),
    }
}

/// Unpacks a downloaded archive into a staging directory next to `dest`,
/// then relocates its top-level entry/entries to `dest` so the result lands
/// under the *requested* name rather than whatever basename the container
/// side used - the rename spec.md §4.1 calls for when a single file's
/// basename differs between source and destination. A multi-entry archive
/// (a directory's contents) is treated as populating `dest` as a directory.
fn untar_into(archive_bytes: &[u8], dest: &str) -> Result<()> {
    let dest_path = std::path::Path::new(dest);
    let parent = non_empty_parent(dest_path);
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::tempdir_in(parent)
        .map_err(|e| QuixandError::FilesystemError(e.to_string()))?;
    let mut archive = tar::Archive::new(archive_bytes);
    archive
        .unpack(staging.path())
        .map_err(|e| QuixandError::FilesystemError(e.to_string()))?;

    let top_level: Vec<std::path::PathBuf> = std::fs::read_dir(staging.path())?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();

    if top_level.len() == 1 {
        replace_path(&top_level[0], dest_path)?;
    } else {
        std::fs::create_dir_all(dest_path)?;
        for entry in top_level {
            let name = entry.file_name().ok_or_else(|| {
                QuixandError::FilesystemError("archive entry has no file name".to_string())
            })?;
            replace_path(&entry, &dest_path.join(name))?;
        }
    }
    Ok(())
}

/// Moves `from` to `to`, clearing out anything already at `to` first so the
/// rename doesn't fail on an existing file or non-empty directory.
fn replace_path(from: &std::path::Path, to: &std::path::Path) -> Result<()> {
    if to.is_dir() {
        std::fs::remove_dir_all(to)?;
    } else if to.exists() {
        std::fs::remove_file(to)?;
    }
    std::fs::rename(from, to)?;
    Ok(())
}

#[cfg(test)]
mod tar_roundtrip_tests {
    use super::*;

    #[test]
    fn single_file_is_renamed_to_requested_basename() {
        let src_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("original.txt");
        std::fs::write(&src_file, b"hello").unwrap();

        let tar_bytes = tar_single_file(&src_file, std::ffi::OsStr::new("renamed.txt")).unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = dest_dir.path().join("renamed.txt");
        untar_into(&tar_bytes, &dest.to_string_lossy()).unwrap();

        assert!(dest.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!dest_dir.path().join("original.txt").exists());
    }

    #[test]
    fn directory_contents_land_inside_dest() {
        let src_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.txt"), b"A").unwrap();
        std::fs::create_dir(src_dir.path().join("sub")).unwrap();
        std::fs::write(src_dir.path().join("sub/b.txt"), b"B").unwrap();

        let tar_bytes = tar_directory(src_dir.path()).unwrap();

        let dest_root = tempfile::tempdir().unwrap();
        let dest = dest_root.path().join("copy");
        untar_into(&tar_bytes, &dest.to_string_lossy()).unwrap();

        assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"A");
        assert_eq!(std::fs::read(dest.join("sub/b.txt")).unwrap(), b"B");
    }
}
