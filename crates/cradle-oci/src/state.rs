//! Container state document.
//!
//! Based on the OCI Runtime Specification state format:
//! <https://github.com/opencontainers/runtime-spec/blob/main/runtime.md#state>

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Container runtime state as printed by `cradle state`.
///
/// `pid` and `annotations` are always present in the output, even when they
/// carry no information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// OCI version.
    pub oci_version: String,
    /// Container ID.
    pub id: String,
    /// Container status.
    pub status: ContainerStatus,
    /// Process ID of the container init process, 0 when not reported.
    #[serde(default)]
    pub pid: i32,
    /// Path to the OCI bundle.
    pub bundle: PathBuf,
    /// Annotations.
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// Container status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is being created.
    Creating,
    /// Container has been created but not started.
    Created,
    /// Container is running.
    Running,
    /// Container has exited.
    Stopped,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl ContainerState {
    /// Create a state document with no pid and no annotations.
    #[must_use]
    pub fn new(id: impl Into<String>, status: ContainerStatus, bundle: impl Into<PathBuf>) -> Self {
        Self {
            oci_version: crate::OCI_VERSION.to_string(),
            id: id.into(),
            status,
            pid: 0,
            bundle: bundle.into(),
            annotations: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serialization() {
        let state = ContainerState::new("c1", ContainerStatus::Stopped, "/bundles/c1");

        insta::assert_snapshot!(
            serde_json::to_string(&state).unwrap(),
            @r#"{"ociVersion":"1.2.0","id":"c1","status":"stopped","pid":0,"bundle":"/bundles/c1","annotations":{}}"#
        );
    }

    #[test]
    fn state_round_trip() {
        let state = ContainerState::new("c1", ContainerStatus::Running, "/bundles/c1");
        let json = serde_json::to_string(&state).unwrap();
        let parsed: ContainerState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn status_display() {
        assert_eq!(ContainerStatus::Creating.to_string(), "creating");
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Stopped.to_string(), "stopped");
    }
}
