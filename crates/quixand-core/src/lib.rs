//! `quixand-core`: the host-side SDK for managing ephemeral Docker/Podman
//! sandboxes. This crate is the library half of the split the binaries
//! (`quixand-cli`, `quixand-watchdog`) sit on top of, following the
//! teacher's `process_execution` (lib) / `process_executor` (bin) split -
//! this crate never calls `env_logger::init`, only `log` macros.

pub mod adapter;
pub mod children;
pub mod config;
pub mod error;
pub mod model;
pub mod playground;
pub mod proxy;
pub mod pty;
pub mod runtime;
pub mod sandbox;
pub mod state_store;
pub mod templates;
pub mod watchdog;

pub use adapter::DockerAdapter;
pub use config::Config;
pub use error::{QuixandError, Result};
pub use model::{
    CommandResult, ContainerConfig, ContainerInfo, ContainerState, Execution, ExecConfig,
    ExecResult, FileInfo, SandboxHandle, SandboxState, SandboxStatus, VolumeMount,
};
pub use playground::Playground;
pub use sandbox::{Sandbox, SandboxConfig};
pub use templates::Templates;
