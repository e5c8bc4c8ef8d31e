//! Container lifecycle core.
//!
//! [`LifecycleCoordinator`] owns the state machine and sequences the
//! [`ContainerConfigurer`], the [`SyncBarrier`] and the engine.

pub mod barrier;
mod config;
pub mod configurer;
mod coordinator;
pub mod hook;
mod lifecycle;

pub use barrier::{FifoOps, HostFifo, SyncBarrier};
pub use config::{EngineLogging, RuntimeConfig};
pub use configurer::ContainerConfigurer;
pub use coordinator::LifecycleCoordinator;
pub use lifecycle::LifecycleState;
