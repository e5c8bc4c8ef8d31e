//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use cradle_common::ContainerId;

use crate::engine::LxcEngine;
use crate::runtime::{LifecycleCoordinator, RuntimeConfig};
use crate::signal::Signal;

/// Cradle - OCI runtime shim for LXC
#[derive(Parser, Debug)]
#[command(name = "cradle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for per-container state (the LXC path)
    #[arg(
        long,
        global = true,
        env = "CRADLE_ROOT",
        default_value = "/var/lib/lxc"
    )]
    pub root: PathBuf,

    /// Enable debug mode: verbose logging and full error reports
    #[arg(long, global = true)]
    pub debug: bool,

    /// Set the log level for LXC
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log file for LXC
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Lifecycle commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a container and launch its init, blocked until `start`
    Create {
        /// Container ID
        container_id: ContainerId,

        /// Path to the OCI bundle
        #[arg(short, long, default_value = ".")]
        bundle: PathBuf,

        /// Path to console socket (accepted, not used)
        #[arg(long)]
        console_socket: Option<PathBuf>,

        /// Path to PID file (accepted, not used)
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// Start a created container
    Start {
        /// Container ID
        container_id: ContainerId,
    },

    /// Print the state of a container as JSON
    State {
        /// Container ID
        container_id: ContainerId,
    },

    /// Send a signal to a container's init
    Kill {
        /// Container ID
        container_id: ContainerId,

        /// Signal name or number
        #[arg(default_value = "SIGTERM")]
        signal: Signal,
    },

    /// Delete a stopped container
    Delete {
        /// Container ID
        container_id: ContainerId,
    },
}

impl Cli {
    /// Build the runtime configuration from the global flags.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        let mut config = RuntimeConfig::default()
            .with_root(self.root.clone())
            .with_debug(self.debug);
        if let Some(level) = &self.log_level {
            config = config.with_engine_log_level(level.clone());
        }
        if let Some(file) = &self.log_file {
            config = config.with_engine_log_file(file.clone());
        }
        config
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns the failed operation's error, wrapped with the command and
    /// container it applied to.
    pub async fn execute(self) -> Result<()> {
        let config = self.runtime_config();
        let engine = Arc::new(LxcEngine::new(&config.paths));
        let coordinator = LifecycleCoordinator::new(config, engine);

        match self.command {
            Commands::Create {
                container_id,
                bundle,
                console_socket,
                pid_file,
            } => {
                if console_socket.is_some() || pid_file.is_some() {
                    tracing::debug!(
                        console_socket = ?console_socket,
                        pid_file = ?pid_file,
                        "Ignoring console socket and pid file"
                    );
                }
                coordinator
                    .create(&container_id, &bundle)
                    .await
                    .wrap_err_with(|| format!("failed to create container {container_id}"))
            }

            Commands::Start { container_id } => coordinator
                .start(&container_id)
                .await
                .wrap_err_with(|| format!("failed to start container {container_id}")),

            Commands::State { container_id } => {
                let state = coordinator
                    .state(&container_id)
                    .await
                    .wrap_err_with(|| format!("failed to get state of container {container_id}"))?;
                println!("{}", serde_json::to_string(&state)?);
                Ok(())
            }

            Commands::Kill {
                container_id,
                signal,
            } => coordinator
                .kill(&container_id, signal)
                .await
                .wrap_err_with(|| format!("failed to send {signal} to container {container_id}")),

            Commands::Delete { container_id } => coordinator
                .delete(&container_id)
                .await
                .wrap_err_with(|| format!("failed to delete container {container_id}")),
        }
    }
}
