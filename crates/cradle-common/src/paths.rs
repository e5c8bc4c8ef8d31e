//! Standard filesystem paths for Cradle.
//!
//! Every per-container path is derived from the container ID alone, so
//! separate `create` and `start` invocations agree on where the sync fifo and
//! saved configuration live without sharing any memory.

use std::path::PathBuf;

use once_cell::sync::Lazy;

use crate::id::ContainerId;

/// Default root directory for container state (the LXC path).
pub static CRADLE_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CRADLE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/lxc"))
});

/// File name of the sync fifo inside a container directory.
pub const SYNC_FIFO: &str = "syncfifo";

/// File name of the generated start hook.
pub const SYNC_HOOK: &str = "sync-fifo-wait";

/// File name of the hook's progress log.
pub const SYNC_HOOK_LOG: &str = "syncfifo-hook.log";

/// File name holding the pid of the engine's monitor process.
pub const MONITOR_PID: &str = "monitor.pid";

/// File name of the saved engine configuration.
pub const ENGINE_CONFIG: &str = "config";

/// Standard paths used by the Cradle runtime.
#[derive(Debug, Clone)]
pub struct CradlePaths {
    /// Root directory holding one subdirectory per container.
    pub root: PathBuf,
}

impl CradlePaths {
    /// Create paths with the default root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory for a specific container.
    #[must_use]
    pub fn container(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// The sync fifo gating the container's init.
    #[must_use]
    pub fn sync_fifo(&self, id: &ContainerId) -> PathBuf {
        self.container(id).join(SYNC_FIFO)
    }

    /// The generated start hook script.
    #[must_use]
    pub fn sync_hook(&self, id: &ContainerId) -> PathBuf {
        self.container(id).join(SYNC_HOOK)
    }

    /// Progress log written by the start hook.
    #[must_use]
    pub fn sync_hook_log(&self, id: &ContainerId) -> PathBuf {
        self.container(id).join(SYNC_HOOK_LOG)
    }

    /// Pid of the engine process supervising the container.
    #[must_use]
    pub fn monitor_pid(&self, id: &ContainerId) -> PathBuf {
        self.container(id).join(MONITOR_PID)
    }

    /// Saved engine configuration, kept for debugging and `lxc-attach`.
    #[must_use]
    pub fn engine_config(&self, id: &ContainerId) -> PathBuf {
        self.container(id).join(ENGINE_CONFIG)
    }
}

impl Default for CradlePaths {
    fn default() -> Self {
        Self {
            root: CRADLE_ROOT.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ContainerId {
        ContainerId::new(s).unwrap()
    }

    #[test]
    fn custom_root() {
        let paths = CradlePaths::with_root("/tmp/cradle-test");
        assert_eq!(
            paths.container(&id("abc123")),
            PathBuf::from("/tmp/cradle-test/abc123")
        );
    }

    #[test]
    fn per_container_files() {
        let paths = CradlePaths::with_root("/var/lib/lxc");
        let c1 = id("c1");
        assert_eq!(
            paths.sync_fifo(&c1),
            PathBuf::from("/var/lib/lxc/c1/syncfifo")
        );
        assert_eq!(
            paths.sync_hook(&c1),
            PathBuf::from("/var/lib/lxc/c1/sync-fifo-wait")
        );
        assert_eq!(
            paths.engine_config(&c1),
            PathBuf::from("/var/lib/lxc/c1/config")
        );
        assert_eq!(
            paths.sync_hook_log(&c1),
            PathBuf::from("/var/lib/lxc/c1/syncfifo-hook.log")
        );
        assert_eq!(
            paths.monitor_pid(&c1),
            PathBuf::from("/var/lib/lxc/c1/monitor.pid")
        );
    }
}
