//! Runtime Abstraction: a uniform async trait over Docker/Podman, grounded
//! in `quixand/container/base.py::ContainerRuntime` and, for the actual
//! bollard wiring, `engine/process_execution/docker/src/docker.rs`.

mod docker;
mod podman;

pub use docker::DockerRuntime;
pub use podman::PodmanRuntime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{ContainerConfig, ContainerInfo, ExecConfig, ExecResult};

pub struct PtySession {
    pub container_id: String,
    pub exec_id: Option<String>,
}

#[async_trait]
pub trait Runtime: Send + Sync {
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;
    async fn start_container(&self, container_id: &str) -> Result<()>;
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;
    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo>;
    async fn container_exists(&self, container_id: &str) -> Result<bool>;

    async fn exec_in_container(
        &self,
        container_id: &str,
        config: &ExecConfig,
        timeout_secs: Option<u64>,
    ) -> Result<ExecResult>;

    async fn copy_to_container(&self, container_id: &str, source: &str, dest: &str) -> Result<()>;
    async fn copy_from_container(&self, container_id: &str, source: &str, dest: &str)
        -> Result<()>;

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>>;

    async fn get_container_logs(
        &self,
        container_id: &str,
        stdout: bool,
        stderr: bool,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        tail: Option<usize>,
    ) -> Result<String>;

    async fn wait_container(&self, container_id: &str, timeout_secs: Option<u64>) -> Result<i64>;

    async fn create_pty_session(
        &self,
        container_id: &str,
        command: &str,
        env: Option<&std::collections::HashMap<String, String>>,
    ) -> Result<PtySession>;

    /// Starts the reader/writer threads for an already-created exec
    /// session (see [`crate::pty::PtyHandle`]). Split out from
    /// `create_pty_session` because attaching needs the backend's live
    /// client, which only each `Runtime` impl holds.
    async fn attach_pty(&self, exec_id: &str) -> Result<crate::pty::PtyHandle>;

    /// Pulls `image` if it is not already present locally, matching the
    /// `ImagePullPolicy::IfMissing` default in the teacher's docker backend.
    async fn ensure_image(&self, image: &str) -> Result<()>;
}

/// Picks a backend by name, matching spec `QS_RUNTIME` values. Connection
/// is attempted eagerly so callers get `RuntimeUnavailable` up front rather
/// than on first use.
pub async fn connect(runtime_name: &str) -> Result<std::sync::Arc<dyn Runtime>> {
    match runtime_name {
        "podman" => Ok(std::sync::Arc::new(PodmanRuntime::connect().await?)),
        _ => Ok(std::sync::Arc::new(DockerRuntime::connect().await?)),
    }
}
