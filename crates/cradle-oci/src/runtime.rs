//! OCI Runtime Specification types.
//!
//! Only the parts of config.json that the shim translates into engine
//! configuration are modelled. Unknown fields are ignored on load.
//!
//! Based on the OCI Runtime Specification v1.2.0:
//! <https://github.com/opencontainers/runtime-spec/blob/main/config.md>

use std::path::{Path, PathBuf};

use cradle_common::{CradleError, CradleResult};
use serde::{Deserialize, Serialize};

/// File name of the runtime spec inside a bundle.
pub const BUNDLE_CONFIG: &str = "config.json";

/// OCI Runtime Specification (config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// OCI version.
    #[serde(default = "default_oci_version")]
    pub oci_version: String,

    /// Container's root filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,

    /// Container process configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,

    /// Container hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Additional mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,
}

fn default_oci_version() -> String {
    crate::OCI_VERSION.to_string()
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            oci_version: default_oci_version(),
            root: None,
            process: None,
            hostname: None,
            mounts: Vec::new(),
        }
    }
}

impl Spec {
    /// Load `config.json` from a bundle directory.
    ///
    /// A relative `root.path` is resolved against the bundle directory, as
    /// the runtime spec requires.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or is not a valid spec.
    pub fn load(bundle: impl AsRef<Path>) -> CradleResult<Self> {
        let bundle = bundle.as_ref();
        let path = bundle.join(BUNDLE_CONFIG);

        let json = std::fs::read_to_string(&path)
            .map_err(|e| CradleError::io_at("read bundle spec", &path, e))?;
        let mut spec: Self = serde_json::from_str(&json).map_err(|e| CradleError::Config {
            message: format!("invalid bundle spec '{}': {e}", path.display()),
        })?;

        if let Some(root) = spec.root.as_mut() {
            if root.path.is_relative() {
                root.path = bundle.join(&root.path);
            }
        }

        tracing::debug!(path = %path.display(), "Loaded bundle spec");
        Ok(spec)
    }

    /// The root filesystem, which a runnable spec must have.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `root` is absent.
    pub fn require_root(&self) -> CradleResult<&Root> {
        self.root.as_ref().ok_or_else(|| CradleError::Config {
            message: "bundle spec has no root".to_string(),
        })
    }

    /// The process, which a runnable spec must have.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `process` is absent or has no args.
    pub fn require_process(&self) -> CradleResult<&Process> {
        let process = self.process.as_ref().ok_or_else(|| CradleError::Config {
            message: "bundle spec has no process".to_string(),
        })?;
        if process.args.is_empty() {
            return Err(CradleError::Config {
                message: "bundle spec process has no args".to_string(),
            });
        }
        Ok(process)
    }
}

/// Root filesystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    /// Path to the root filesystem.
    pub path: PathBuf,

    /// Whether the root filesystem is read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Whether to run with a terminal.
    #[serde(default)]
    pub terminal: bool,

    /// Console size (if terminal is true).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_size: Option<ConsoleSize>,

    /// User to run as.
    #[serde(default)]
    pub user: User,

    /// Command arguments.
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Working directory.
    pub cwd: PathBuf,
}

/// Console size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsoleSize {
    /// Height in characters.
    pub height: u32,
    /// Width in characters.
    pub width: u32,
}

/// User and group IDs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID.
    pub uid: u32,
    /// Group ID.
    pub gid: u32,
    /// Additional group IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

/// Mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount destination path (inside container).
    pub destination: PathBuf,
    /// Mount type (e.g., "bind", "tmpfs", "proc").
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    /// Mount source path (outside container).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Mount options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}
