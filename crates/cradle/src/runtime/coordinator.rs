//! Lifecycle coordinator.
//!
//! Sequences the engine, the configurer and the start barrier for the five
//! lifecycle commands. Each command runs in its own process, so every call
//! resolves the container fresh through the engine and the filesystem.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cradle_common::{ContainerId, CradleError, CradleResult};
use cradle_oci::{ContainerState, Spec};

use super::barrier::{FifoOps, HostFifo, SyncBarrier};
use super::config::RuntimeConfig;
use super::configurer::ContainerConfigurer;
use super::hook;
use super::lifecycle::LifecycleState;
use crate::engine::config::keys;
use crate::engine::{ContainerEngine, InitStdio};
use crate::signal::Signal;

/// Drives containers through `create`, `start`, `state`, `kill` and `delete`.
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    config: RuntimeConfig,
    engine: Arc<dyn ContainerEngine>,
    fifo: Arc<dyn FifoOps>,
}

impl LifecycleCoordinator {
    /// Create a coordinator using host fifos.
    pub fn new(config: RuntimeConfig, engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            config,
            engine,
            fifo: Arc::new(HostFifo),
        }
    }

    /// Replace the fifo operations used for the start barrier.
    #[must_use]
    pub fn with_fifo_ops(mut self, fifo: Arc<dyn FifoOps>) -> Self {
        self.fifo = fifo;
        self
    }

    /// The runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn barrier(&self, id: &ContainerId) -> SyncBarrier {
        SyncBarrier::with_ops(self.config.paths.sync_fifo(id), Arc::clone(&self.fifo))
    }

    async fn require(&self, id: &ContainerId) -> CradleResult<()> {
        if self.engine.exists(id).await? {
            Ok(())
        } else {
            Err(CradleError::ContainerNotFound { id: id.to_string() })
        }
    }

    /// Create a container from the bundle at `bundle` and launch its init.
    ///
    /// Returns once the init process is launched. It stays blocked in its
    /// start hook until [`start`](Self::start) releases the barrier.
    ///
    /// A failure part way through leaves whatever was already provisioned on
    /// disk.
    ///
    /// # Errors
    ///
    /// Fails with [`CradleError::ContainerExists`] if the engine already has a
    /// record for `id`, and with the underlying error if the bundle cannot be
    /// read or any provisioning step fails.
    #[tracing::instrument(skip_all, fields(container_id = %id))]
    pub async fn create(&self, id: &ContainerId, bundle: &Path) -> CradleResult<()> {
        if self.engine.exists(id).await? {
            return Err(CradleError::ContainerExists { id: id.to_string() });
        }

        let bundle = std::path::absolute(bundle)
            .map_err(|e| CradleError::io_at("resolve bundle", bundle, e))?;
        let spec = Spec::load(&bundle)?;
        let engine_config = ContainerConfigurer::new(&self.config).translate(id, &spec)?;
        let stdio = if spec.require_process()?.terminal {
            InitStdio::Null
        } else {
            InitStdio::Inherit
        };

        tracing::info!(
            bundle = %bundle.display(),
            state = %LifecycleState::Creating,
            "Creating container"
        );

        let paths = &self.config.paths;
        std::fs::create_dir_all(&paths.root)
            .map_err(|e| CradleError::io_at("create root directory", &paths.root, e))?;
        let container_dir = paths.container(id);
        std::fs::create_dir(&container_dir)
            .map_err(|e| CradleError::io_at("create container directory", &container_dir, e))?;

        // The barrier must exist before anything can launch the init.
        self.barrier(id).provision()?;
        hook::install(
            &paths.sync_hook(id),
            &paths.sync_fifo(id),
            &paths.sync_hook_log(id),
        )?;

        ContainerConfigurer::commit(self.engine.as_ref(), id, &engine_config).await?;
        self.engine.start_init(id, stdio).await?;

        tracing::info!(state = %LifecycleState::Created, "Container created");
        Ok(())
    }

    /// Release the start barrier of a created container.
    ///
    /// Blocks until the container's start hook has written its readiness
    /// token and closed the fifo. There is no timeout.
    ///
    /// # Errors
    ///
    /// Fails with [`CradleError::ContainerNotFound`],
    /// [`CradleError::AlreadyRunning`] or [`CradleError::BarrierMissing`]
    /// when the container cannot be started, and with
    /// [`CradleError::BarrierInterrupted`] if the hook closed the fifo
    /// without writing.
    #[tracing::instrument(skip_all, fields(container_id = %id))]
    pub async fn start(&self, id: &ContainerId) -> CradleResult<()> {
        self.require(id).await?;

        if self.engine.running(id).await? {
            return Err(CradleError::AlreadyRunning { id: id.to_string() });
        }

        let barrier = self.barrier(id);
        if !barrier.is_armed() {
            return Err(CradleError::BarrierMissing {
                path: barrier.path().to_path_buf(),
            });
        }

        // Held until the drain completes so a concurrent start cannot attach
        // a second reader.
        let _guard = lock_container_dir(id, &self.config.paths.container(id))?;

        tracing::info!(fifo = %barrier.path().display(), "Releasing start barrier");
        tokio::task::spawn_blocking(move || barrier.release())
            .await
            .map_err(|e| CradleError::Io(std::io::Error::other(e)))??;

        tracing::info!("Container started");
        Ok(())
    }

    /// Report the state of a container.
    ///
    /// # Errors
    ///
    /// Fails with [`CradleError::ContainerNotFound`] if the container does not
    /// exist, or with the engine's error if it cannot be queried.
    pub async fn state(&self, id: &ContainerId) -> CradleResult<ContainerState> {
        self.require(id).await?;

        let config = self.engine.load(id).await?;
        let running = self.engine.running(id).await?;
        let lifecycle = LifecycleState::derive(running, self.barrier(id).is_armed());

        let bundle = config.first(keys::ROOTFS_PATH).map_or_else(PathBuf::new, |rootfs| {
            let rootfs = Path::new(rootfs);
            rootfs.parent().unwrap_or(rootfs).to_path_buf()
        });

        tracing::debug!(container_id = %id, state = %lifecycle, "Resolved container state");
        Ok(ContainerState::new(
            id.as_str(),
            lifecycle.reported_status(),
            bundle,
        ))
    }

    /// Send `signal` to the container's init.
    ///
    /// # Errors
    ///
    /// Fails with [`CradleError::ContainerNotFound`] if the container does not
    /// exist, or with the engine's error if the signal cannot be delivered.
    #[tracing::instrument(skip_all, fields(container_id = %id, signal = %signal))]
    pub async fn kill(&self, id: &ContainerId, signal: Signal) -> CradleResult<()> {
        self.require(id).await?;
        self.engine.kill(id, signal).await?;
        tracing::info!("Signal delivered");
        Ok(())
    }

    /// Delete a container that is no longer running.
    ///
    /// # Errors
    ///
    /// Fails with [`CradleError::ContainerNotFound`] if the container does not
    /// exist and with [`CradleError::StillRunning`] if it is running. A
    /// running container is never stopped implicitly.
    #[tracing::instrument(skip_all, fields(container_id = %id))]
    pub async fn delete(&self, id: &ContainerId) -> CradleResult<()> {
        self.require(id).await?;

        if self.engine.running(id).await? {
            return Err(CradleError::StillRunning { id: id.to_string() });
        }

        self.engine.release(id).await?;

        let container_dir = self.config.paths.container(id);
        match std::fs::remove_dir_all(&container_dir) {
            Ok(()) => {}
            // The engine may already have removed it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CradleError::io_at(
                    "remove container directory",
                    container_dir,
                    e,
                ));
            }
        }

        tracing::info!("Container deleted");
        Ok(())
    }
}

/// Take an exclusive, non-blocking lock on the container directory.
fn lock_container_dir(id: &ContainerId, dir: &Path) -> CradleResult<File> {
    use rustix::fs::{FlockOperation, flock};
    use rustix::io::Errno;

    let handle =
        File::open(dir).map_err(|e| CradleError::io_at("open container directory", dir, e))?;
    match flock(&handle, FlockOperation::NonBlockingLockExclusive) {
        Ok(()) => Ok(handle),
        Err(e) if e == Errno::WOULDBLOCK => Err(CradleError::AlreadyRunning { id: id.to_string() }),
        Err(e) => Err(CradleError::io_at("lock container directory", dir, e.into())),
    }
}
