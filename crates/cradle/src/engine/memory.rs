//! In-process engine for tests.
//!
//! Records live in memory, but configuration is saved to the real container
//! directory and the start hook is the real generated script run with
//! `/bin/sh`. The "init" counts as running once the hook has exited
//! successfully, and keeps running until it is killed or [`MemoryEngine::exit`]
//! is called.

use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cradle_common::{ContainerId, CradleError, CradlePaths, CradleResult};
use parking_lot::Mutex;

use super::config::keys;
use super::{ContainerEngine, EngineConfig, InitStdio};
use crate::signal::Signal;

const HOOK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Record {
    /// The start hook while it is blocked at the barrier.
    hook: Option<Child>,
    launched: bool,
    running: bool,
    signals: Vec<Signal>,
}

/// [`ContainerEngine`] that simulates container processes.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    paths: CradlePaths,
    records: Arc<Mutex<HashMap<ContainerId, Record>>>,
}

impl MemoryEngine {
    /// Create an engine saving configuration under `paths.root`.
    #[must_use]
    pub fn new(paths: CradlePaths) -> Self {
        Self {
            paths,
            records: Arc::default(),
        }
    }

    /// Simulate the user program exiting.
    pub fn exit(&self, id: &ContainerId) {
        if let Some(record) = self.records.lock().get_mut(id) {
            record.running = false;
        }
    }

    /// Returns true once `start_init` has been called for `id`.
    #[must_use]
    pub fn launched(&self, id: &ContainerId) -> bool {
        self.records.lock().get(id).is_some_and(|r| r.launched)
    }

    /// Returns true while the start hook of `id` is blocked.
    #[must_use]
    pub fn hook_pending(&self, id: &ContainerId) -> bool {
        self.records.lock().get(id).is_some_and(|r| r.hook.is_some())
    }

    /// Signals delivered to `id`, oldest first.
    #[must_use]
    pub fn signals(&self, id: &ContainerId) -> Vec<Signal> {
        self.records
            .lock()
            .get(id)
            .map(|r| r.signals.clone())
            .unwrap_or_default()
    }

    fn not_found(id: &ContainerId) -> CradleError {
        CradleError::ContainerNotFound { id: id.to_string() }
    }

    /// Wait for the hook to exit and mark the init running if it succeeded.
    fn supervise(records: &Mutex<HashMap<ContainerId, Record>>, id: &ContainerId) {
        loop {
            {
                let mut records = records.lock();
                let Some(record) = records.get_mut(id) else {
                    return;
                };
                let Some(hook) = record.hook.as_mut() else {
                    return;
                };
                match hook.try_wait() {
                    Ok(None) => {}
                    Ok(Some(status)) => {
                        record.hook = None;
                        record.running = status.success();
                        if !status.success() {
                            tracing::warn!(container_id = %id, %status, "Start hook failed");
                        }
                        return;
                    }
                    Err(e) => {
                        record.hook = None;
                        tracing::warn!(container_id = %id, error = %e, "Lost start hook");
                        return;
                    }
                }
            }
            std::thread::sleep(HOOK_POLL_INTERVAL);
        }
    }
}

#[async_trait]
impl ContainerEngine for MemoryEngine {
    async fn exists(&self, id: &ContainerId) -> CradleResult<bool> {
        Ok(self.records.lock().contains_key(id))
    }

    async fn load(&self, id: &ContainerId) -> CradleResult<EngineConfig> {
        if !self.records.lock().contains_key(id) {
            return Err(Self::not_found(id));
        }
        EngineConfig::read_from(&self.paths.engine_config(id))
    }

    async fn save(&self, id: &ContainerId, config: &EngineConfig) -> CradleResult<()> {
        config.write_to(&self.paths.engine_config(id))?;
        self.records.lock().entry(id.clone()).or_default();
        Ok(())
    }

    async fn running(&self, id: &ContainerId) -> CradleResult<bool> {
        self.records
            .lock()
            .get(id)
            .map(|r| r.running)
            .ok_or_else(|| Self::not_found(id))
    }

    async fn start_init(&self, id: &ContainerId, stdio: InitStdio) -> CradleResult<()> {
        let config = self.load(id).await?;
        let hook_path = config.first(keys::HOOK_START_HOST).ok_or_else(|| {
            CradleError::engine("start init", format!("no {} configured", keys::HOOK_START_HOST))
        })?;

        let (stdout, stderr) = match stdio {
            InitStdio::Inherit => (Stdio::inherit(), Stdio::inherit()),
            InitStdio::Null => (Stdio::null(), Stdio::null()),
        };

        {
            let mut records = self.records.lock();
            let record = records.get_mut(id).ok_or_else(|| Self::not_found(id))?;
            if record.launched {
                return Err(CradleError::engine("start init", "init already launched"));
            }
            let hook = Command::new("/bin/sh")
                .arg(hook_path)
                .stdin(Stdio::null())
                .stdout(stdout)
                .stderr(stderr)
                .spawn()
                .map_err(|e| CradleError::engine("start init", format!("failed to run hook: {e}")))?;
            record.launched = true;
            record.hook = Some(hook);
        }

        let records = Arc::clone(&self.records);
        let id = id.clone();
        std::thread::spawn(move || Self::supervise(&records, &id));
        Ok(())
    }

    async fn kill(&self, id: &ContainerId, signal: Signal) -> CradleResult<()> {
        let mut records = self.records.lock();
        let record = records.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if !record.running {
            return Err(CradleError::engine("kill", "container has no init process"));
        }
        record.signals.push(signal);
        if signal == Signal::TERM || signal == Signal::KILL {
            record.running = false;
        }
        Ok(())
    }

    async fn release(&self, id: &ContainerId) -> CradleResult<()> {
        let mut record = self
            .records
            .lock()
            .remove(id)
            .ok_or_else(|| Self::not_found(id))?;
        if let Some(mut hook) = record.hook.take() {
            // Equivalent of stopping a container still blocked in its hook.
            hook.kill()
                .and_then(|()| hook.wait().map(drop))
                .map_err(|e| CradleError::engine("release", e.to_string()))?;
        }
        Ok(())
    }
}
