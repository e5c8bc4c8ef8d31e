//! Container lifecycle states.

use cradle_oci::ContainerStatus;

/// Where a container is in its lifecycle.
///
/// Nothing is persisted: the state is derived on every call from the engine's
/// running predicate and the presence of the sync fifo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// `create` is still provisioning the container.
    Creating,
    /// The init process is blocked at the start barrier.
    Created,
    /// The user program is executing.
    Running,
    /// The user program has exited, or never got past the barrier.
    Stopped,
}

impl LifecycleState {
    /// Derive the state of an existing container.
    #[must_use]
    pub const fn derive(running: bool, barrier_armed: bool) -> Self {
        match (running, barrier_armed) {
            (true, _) => Self::Running,
            (false, true) => Self::Created,
            (false, false) => Self::Stopped,
        }
    }

    /// The status reported by `state`.
    ///
    /// Only `running` and `stopped` are reported. A container blocked at the
    /// barrier shows as `stopped`.
    #[must_use]
    pub const fn reported_status(self) -> ContainerStatus {
        match self {
            Self::Running => ContainerStatus::Running,
            Self::Creating | Self::Created | Self::Stopped => ContainerStatus::Stopped,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
