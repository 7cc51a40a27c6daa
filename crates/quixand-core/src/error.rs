//! Error taxonomy for the sandbox SDK.
//!
//! Kept as a single closed enum rather than per-module error types so that
//! callers crossing component boundaries (adapter -> facade -> CLI) never
//! need to downcast. Constructive operations return `Result<T, QuixandError>`;
//! destructive/best-effort operations (stop, remove, cleanup) swallow errors
//! and log instead, per the propagation policy below.

use std::fmt;

pub type Result<T> = std::result::Result<T, QuixandError>;

#[derive(Debug, thiserror::Error)]
pub enum QuixandError {
    #[error("image unavailable: {0}")]
    ImageUnavailable(String),

    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("proxy error: {0}")]
    ProxyError(String),

    #[error("filesystem error: {0}")]
    FilesystemError(String),

    #[error("template error: {0}")]
    TemplateError(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl QuixandError {
    pub fn unknown(msg: impl fmt::Display) -> Self {
        QuixandError::Unknown(msg.to_string())
    }
}

impl From<bollard::errors::Error> for QuixandError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error as BErr;
        match &err {
            BErr::DockerResponseServerError { status_code, message } => match *status_code {
                404 => QuixandError::NotFound(message.clone()),
                // A reachable daemon that rejects the request is a backend
                // error on that one call, not "no runtime reachable" -
                // `RuntimeUnavailable` is reserved for connect-time failures
                // (see `DockerRuntime::connect`), so this falls through to
                // the generic `Unknown` bucket per spec.md §7's taxonomy.
                _ => QuixandError::Unknown(err.to_string()),
            },
            BErr::DockerContainerWaitError { .. } => QuixandError::Unknown(err.to_string()),
            _ => QuixandError::Unknown(err.to_string()),
        }
    }
}

impl From<std::io::Error> for QuixandError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            QuixandError::NotFound(err.to_string())
        } else {
            QuixandError::FilesystemError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QuixandError {
    fn from(err: serde_json::Error) -> Self {
        QuixandError::Unknown(err.to_string())
    }
}
