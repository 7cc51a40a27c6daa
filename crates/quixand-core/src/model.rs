//! Shared data types, grounded in `quixand/container/base.py` and
//! `quixand/types.py`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Resources;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Stopped,
    Exited,
    Dead,
    Removing,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_mount_type")]
    pub r#type: String,
}

fn default_mount_type() -> String {
    "bind".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    pub resources: Option<Resources>,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub ports: HashMap<String, u16>,
}

fn default_workdir() -> String {
    "/workspace".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    pub command: Vec<String>,
    pub env: Option<HashMap<String, String>>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub privileged: bool,
    pub tty: bool,
    pub stdin: bool,
    pub detach: bool,
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration_seconds: f64,
}

/// Command output as returned to SDK callers, distinct from the lower-level
/// `ExecResult` the runtime layer produces: `text` combines stdout for the
/// common case where callers don't care which stream a line came from.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub text: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration_seconds: f64,
}

impl CommandResult {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Richer result from `run_code`, grounded in `quixand/types.py::Execution`.
/// `images`/`files` are reserved for future rich-artifact capture and are
/// always `None` today; the original never populates them either.
#[derive(Debug, Clone)]
pub struct Execution {
    pub text: String,
    pub images: Option<Vec<String>>,
    pub files: Option<Vec<String>>,
    pub stderr: String,
    pub ok: bool,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A serializable reference to a running sandbox. This is the payload
/// persisted in the State Store, not a live handle with open sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub id: String,
    pub container_id: String,
    pub runtime: String,
    pub workdir: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default = "default_adapter_name")]
    pub adapter: String,
}

fn default_adapter_name() -> String {
    "local-docker".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Creating,
    Running,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub state: SandboxState,
    pub container_id: String,
    pub uptime_seconds: Option<i64>,
    /// `last_active_at + timeout_seconds`, per spec.md §4.2's
    /// `Adapter.status` contract.
    pub timeout_at: DateTime<Utc>,
}
