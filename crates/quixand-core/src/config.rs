//! Process-wide defaults, resolved from environment variables.
//!
//! Mirrors `quixand/config.py::Config`: every field has a env-driven
//! default and callers can override per-call. `QS_ROOT` controls where the
//! state directory and template index live (defaults to `~/.quixand`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_IMAGE: &str = "python:3.11-slim";
pub const DEFAULT_RUNTIME: &str = "docker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Bridge,
    Host,
    None,
}

impl Default for NetworkMode {
    fn default() -> Self {
        NetworkMode::Bridge
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_limit: Option<f64>,
    pub mem_limit: Option<String>,
    pub pids_limit: Option<u32>,
    #[serde(default)]
    pub network: NetworkMode,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub adapter: String,
    pub timeout_seconds: u64,
    pub image: String,
    pub runtime: String,
    pub root: PathBuf,
    pub metadata: serde_json::Value,
    pub disable_watchdog: bool,
}

impl Config {
    /// Resolves the process-wide config from environment variables, the
    /// way `adapters/local_docker.py` and `config.py` do on every call site
    /// rather than a single process-start snapshot, so tests can mutate
    /// `std::env` between cases.
    pub fn from_env() -> Self {
        let root = std::env::var("QS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root());

        let metadata = std::env::var("QS_METADATA")
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null);

        Config {
            adapter: std::env::var("QS_ADAPTER").unwrap_or_else(|_| "local-docker".to_string()),
            timeout_seconds: std::env::var("QS_TIMEOUT_DEFAULT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            image: std::env::var("QS_IMAGE").unwrap_or_else(|_| DEFAULT_IMAGE.to_string()),
            runtime: std::env::var("QS_RUNTIME").unwrap_or_else(|_| DEFAULT_RUNTIME.to_string()),
            root,
            metadata,
            disable_watchdog: is_truthy(std::env::var("QS_DISABLE_WATCHDOG").ok()),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn template_index_file(&self) -> PathBuf {
        self.templates_dir().join("index.json")
    }

    pub fn ensure_root_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.templates_dir())?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::from_env()
    }
}

/// Treats `QS_DISABLE_WATCHDOG` as truthy unless unset or set to an
/// explicit falsy token, matching the original's `_is_truthy` env helper
/// rather than Rust's usual "presence = true" convention for flag vars.
fn is_truthy(raw: Option<String>) -> bool {
    match raw {
        None => false,
        Some(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off"),
    }
}

fn default_root() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".quixand")
}
