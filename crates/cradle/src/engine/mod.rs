//! Container engine abstraction.
//!
//! The engine owns namespaces, cgroups, mounts and process execution. The
//! lifecycle coordinator only needs a handful of capabilities from it, which
//! [`ContainerEngine`] captures so the coordinator can run against LXC in
//! production and against an in-process engine in tests (`MemoryEngine`,
//! behind the `test-util` feature).

pub mod config;
mod lxc;
#[cfg(any(test, feature = "test-util"))]
mod memory;

use async_trait::async_trait;
use cradle_common::{ContainerId, CradleResult};

use crate::signal::Signal;

pub use config::EngineConfig;
pub use lxc::LxcEngine;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryEngine;

/// How the container init's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStdio {
    /// Inherit the caller's stdin, stdout and stderr.
    Inherit,
    /// Detach all three streams.
    Null,
}

/// Capabilities the lifecycle coordinator needs from a container engine.
///
/// Every call resolves the container record fresh by ID. Implementations must
/// not rely on state cached from an earlier call, because each lifecycle
/// command runs in its own process.
#[async_trait]
pub trait ContainerEngine: Send + Sync + std::fmt::Debug {
    /// Returns true if a record for `id` exists.
    async fn exists(&self, id: &ContainerId) -> CradleResult<bool>;

    /// Load the saved configuration of an existing record.
    async fn load(&self, id: &ContainerId) -> CradleResult<EngineConfig>;

    /// Persist `config` as the record for `id`.
    ///
    /// This is the terminal step of configuration. The record is never
    /// mutated afterwards.
    async fn save(&self, id: &ContainerId, config: &EngineConfig) -> CradleResult<()>;

    /// Returns true if the container's init is executing the user program.
    ///
    /// A container whose init is still blocked in its start hook is not
    /// running.
    async fn running(&self, id: &ContainerId) -> CradleResult<bool>;

    /// Launch the container's init. Returns once the launch is under way.
    async fn start_init(&self, id: &ContainerId, stdio: InitStdio) -> CradleResult<()>;

    /// Deliver `signal` to the container's init.
    async fn kill(&self, id: &ContainerId, signal: Signal) -> CradleResult<()>;

    /// Release every engine-held resource of a container that is not running.
    async fn release(&self, id: &ContainerId) -> CradleResult<()>;
}
