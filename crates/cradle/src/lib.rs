//! # Cradle
//!
//! Cradle is an OCI runtime shim that runs containers with LXC.
//!
//! `create` configures an LXC container from an OCI bundle and launches its
//! init, which then waits in a start hook on a named pipe. `start` drains the
//! pipe, letting the init go on to execute the user program. The two commands
//! are separate process invocations and share nothing but the filesystem.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use cradle::engine::LxcEngine;
//! use cradle::runtime::{LifecycleCoordinator, RuntimeConfig};
//! use cradle_common::ContainerId;
//!
//! # async fn example() -> cradle_common::CradleResult<()> {
//! let config = RuntimeConfig::default();
//! let engine = Arc::new(LxcEngine::new(&config.paths));
//! let coordinator = LifecycleCoordinator::new(config, engine);
//!
//! let id = ContainerId::new("my-container")?;
//! coordinator.create(&id, Path::new("/bundles/my-container")).await?;
//!
//! // Later, possibly from another process
//! coordinator.start(&id).await?;
//! println!("{}", coordinator.state(&id).await?.status);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod engine;
pub mod runtime;
pub mod signal;

pub use runtime::LifecycleCoordinator;
pub use signal::Signal;
