//! Podman backend. Podman's REST API is Docker-compatible, so this is a
//! thin delegation to [`DockerRuntime`] pointed at the Podman socket, with
//! resource-flag translation where the two engines disagree (cpu-shares
//! instead of nano-CPUs - Podman's API does not accept `NanoCpus` on
//! rootless sockets the way dockerd does).

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use chrono::{DateTime, Utc};

use crate::error::{QuixandError, Result};
use crate::model::{ContainerConfig, ContainerInfo, ExecConfig, ExecResult};

use super::docker::CpuLimitMode;
use super::{DockerRuntime, PtySession, Runtime};

pub struct PodmanRuntime {
    inner: DockerRuntime,
}

fn default_podman_uri() -> String {
    if let Ok(uid) = std::env::var("UID") {
        format!("unix:///run/user/{uid}/podman/podman.sock")
    } else {
        "unix:///run/podman/podman.sock".to_string()
    }
}

impl PodmanRuntime {
    pub async fn connect() -> Result<Self> {
        let uri = std::env::var("PODMAN_URI").unwrap_or_else(|_| default_podman_uri());
        let client = Docker::connect_with_socket(&uri, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| QuixandError::RuntimeUnavailable(e.to_string()))?;
        client
            .ping()
            .await
            .map_err(|e| QuixandError::RuntimeUnavailable(e.to_string()))?;
        Ok(PodmanRuntime {
            inner: DockerRuntime::with_cpu_mode(client, CpuLimitMode::Shares),
        })
    }
}

#[async_trait]
impl Runtime for PodmanRuntime {
    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        self.inner.create_container(config).await
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.inner.start_container(container_id).await
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        self.inner.stop_container(container_id, timeout_secs).await
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        self.inner.remove_container(container_id, force).await
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        self.inner.get_container_info(container_id).await
    }

    async fn container_exists(&self, container_id: &str) -> Result<bool> {
        self.inner.container_exists(container_id).await
    }

    async fn exec_in_container(
        &self,
        container_id: &str,
        config: &ExecConfig,
        timeout_secs: Option<u64>,
    ) -> Result<ExecResult> {
        self.inner
            .exec_in_container(container_id, config, timeout_secs)
            .await
    }

    async fn copy_to_container(&self, container_id: &str, source: &str, dest: &str) -> Result<()> {
        self.inner.copy_to_container(container_id, source, dest).await
    }

    async fn copy_from_container(
        &self,
        container_id: &str,
        source: &str,
        dest: &str,
    ) -> Result<()> {
        self.inner
            .copy_from_container(container_id, source, dest)
            .await
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        self.inner.list_containers(all).await
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
        self.inner
            .get_container_logs(container_id, stdout, stderr, since, until, tail)
            .await
    }

    async fn wait_container(&self, container_id: &str, timeout_secs: Option<u64>) -> Result<i64> {
        self.inner.wait_container(container_id, timeout_secs).await
    }

    async fn create_pty_session(
        &self,
        container_id: &str,
        command: &str,
        env: Option<&HashMap<String, String>>,
    ) -> Result<PtySession> {
        self.inner
            .create_pty_session(container_id, command, env)
            .await
    }

    async fn attach_pty(&self, exec_id: &str) -> Result<crate::pty::PtyHandle> {
        self.inner.attach_pty(exec_id).await
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.inner.ensure_image(image).await
    }
}
