//! Common error types for the Cradle runtime shim.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CradleError`].
pub type CradleResult<T> = Result<T, CradleError>;

/// Errors produced by the lifecycle commands.
///
/// None of these are retried locally. Every failure is terminal for the
/// invocation that produced it.
#[derive(Error, Diagnostic, Debug)]
pub enum CradleError {
    /// Container not found.
    #[error("container '{id}' not found")]
    #[diagnostic(code(cradle::container::not_found))]
    ContainerNotFound {
        /// The container ID that was not found.
        id: String,
    },

    /// A container with this ID already exists.
    #[error("container '{id}' already exists")]
    #[diagnostic(
        code(cradle::container::exists),
        help("Delete the existing container or pick another ID")
    )]
    ContainerExists {
        /// The conflicting container ID.
        id: String,
    },

    /// Start was requested for a container that is already running.
    #[error("container '{id}' is already running")]
    #[diagnostic(code(cradle::container::already_running))]
    AlreadyRunning {
        /// The container ID.
        id: String,
    },

    /// Delete was requested for a container that has not stopped.
    #[error("container '{id}' is still running")]
    #[diagnostic(
        code(cradle::container::still_running),
        help("Kill the container and wait for it to stop before deleting it")
    )]
    StillRunning {
        /// The container ID.
        id: String,
    },

    /// The sync fifo is missing, so the container cannot be started.
    #[error("sync fifo '{}' not found", path.display())]
    #[diagnostic(
        code(cradle::barrier::missing),
        help("The container was not created by cradle, or it was already started")
    )]
    BarrierMissing {
        /// Expected location of the fifo.
        path: PathBuf,
    },

    /// The writer side of the sync fifo closed without sending the token.
    #[error("sync fifo '{}' closed before the readiness token was written", path.display())]
    #[diagnostic(
        code(cradle::barrier::interrupted),
        help("The container init probably died inside its start hook; check the hook log")
    )]
    BarrierInterrupted {
        /// Location of the fifo.
        path: PathBuf,
    },

    /// The container engine rejected a configuration item or an operation.
    #[error("engine failed to {operation}{}: {message}", describe_item(key.as_deref(), value.as_deref()))]
    #[diagnostic(code(cradle::engine))]
    Engine {
        /// The engine operation that failed.
        operation: String,
        /// Offending configuration key, if any.
        key: Option<String>,
        /// Offending configuration value, if any.
        value: Option<String>,
        /// What the engine reported.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(cradle::io))]
    Io(#[from] std::io::Error),

    /// I/O error on a known path.
    #[error("failed to {operation} '{}'", path.display())]
    #[diagnostic(code(cradle::io))]
    IoAt {
        /// The filesystem operation that failed.
        operation: String,
        /// The path it operated on.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid container ID format.
    #[error("invalid container ID: '{id}'")]
    #[diagnostic(
        code(cradle::container::invalid_id),
        help("Container IDs must be alphanumeric with hyphens, underscores and dots, 1-64 characters")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// Unknown signal name or number.
    #[error("invalid signal: '{signal}'")]
    #[diagnostic(
        code(cradle::signal::invalid),
        help("Use a name like SIGTERM, TERM or a number like 15")
    )]
    InvalidSignal {
        /// The rejected input.
        signal: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    #[diagnostic(code(cradle::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {message}")]
    #[diagnostic(code(cradle::config))]
    Config {
        /// The error message.
        message: String,
    },
}

fn describe_item(key: Option<&str>, value: Option<&str>) -> String {
    match (key, value) {
        (Some(key), Some(value)) => format!(" (item '{key}' = '{value}')"),
        (Some(key), None) => format!(" (item '{key}')"),
        _ => String::new(),
    }
}

impl CradleError {
    /// Build an [`CradleError::IoAt`] for `operation` on `path`.
    pub fn io_at(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Build an engine failure that is not tied to a configuration item.
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            key: None,
            value: None,
            message: message.into(),
        }
    }

    /// Build an engine failure for a rejected configuration item.
    pub fn engine_item(
        key: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Engine {
            operation: "set config item".to_string(),
            key: Some(key.into()),
            value: Some(value.into()),
            message: message.into(),
        }
    }

    /// Returns true if the error means the container does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound { .. })
    }
}

impl From<serde_json::Error> for CradleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CradleError::ContainerNotFound {
            id: "abc123".to_string(),
        };
        assert_eq!(err.to_string(), "container 'abc123' not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CradleError = io_err.into();
        assert!(matches!(err, CradleError::Io(_)));
    }

    #[test]
    fn engine_item_names_key_and_value() {
        let err = CradleError::engine_item("lxc.uts.name", "bad\nname", "line break in value");
        assert_eq!(
            err.to_string(),
            "engine failed to set config item (item 'lxc.uts.name' = 'bad\nname'): line break in value"
        );
    }

    #[test]
    fn io_at_keeps_source() {
        let err = CradleError::io_at(
            "create sync fifo",
            "/var/lib/lxc/c1/syncfifo",
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        );
        assert_eq!(
            err.to_string(),
            "failed to create sync fifo '/var/lib/lxc/c1/syncfifo'"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
