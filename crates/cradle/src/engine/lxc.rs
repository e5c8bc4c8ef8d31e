#![allow(unsafe_code)]
//! LXC engine backed by the `lxc-*` command line tools.
//!
//! While a container's init is blocked in its start hook, the LXC monitor
//! does not serve its command socket, so `lxc-info` and `lxc-stop` would hang.
//! In that window every query is answered from the hook's progress log
//! instead: the container is not running, has no init to signal, and is
//! released by killing the monitor's process group.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use cradle_common::{ContainerId, CradleError, CradlePaths, CradleResult};
use tokio::process::{Child, Command};

use super::{ContainerEngine, EngineConfig, InitStdio};
use crate::runtime::hook::{self, HookProgress};
use crate::signal::Signal;

const LXC_INFO: &str = "lxc-info";
const LXC_EXECUTE: &str = "lxc-execute";
const LXC_STOP: &str = "lxc-stop";
const LXC_DESTROY: &str = "lxc-destroy";

/// How often to poll while waiting for a launched init to show up.
const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a killed monitor gets to exit before release gives up.
const MONITOR_EXIT_POLLS: u32 = 100;

/// [`ContainerEngine`] driving LXC with the cradle root as LXC path.
#[derive(Debug, Clone)]
pub struct LxcEngine {
    paths: CradlePaths,
}

impl LxcEngine {
    /// Create an engine storing containers under `paths.root`.
    #[must_use]
    pub fn new(paths: &CradlePaths) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    /// Run an LXC tool against container `id` and return its trimmed stdout.
    async fn tool(
        &self,
        program: &str,
        operation: &str,
        id: &ContainerId,
        args: &[&str],
    ) -> CradleResult<String> {
        tracing::debug!(container_id = %id, program, ?args, "Running LXC tool");

        let output = Command::new(program)
            .arg("-n")
            .arg(id.as_str())
            .arg("-P")
            .arg(&self.paths.root)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CradleError::engine(operation, format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CradleError::engine(
                operation,
                format!("{program} {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// The LXC state name, e.g. `STOPPED`, `STARTING` or `RUNNING`.
    ///
    /// Hangs while the init is blocked in its start hook.
    async fn lxc_state(&self, id: &ContainerId) -> CradleResult<String> {
        self.tool(LXC_INFO, "query state", id, &["-s", "-H"]).await
    }

    fn hook_progress(&self, id: &ContainerId) -> CradleResult<HookProgress> {
        hook::progress(&self.paths.sync_hook_log(id))
    }

    /// Kill the monitor of a container blocked at the barrier.
    async fn stop_blocked_monitor(&self, id: &ContainerId) -> CradleResult<()> {
        let path = self.paths.monitor_pid(id);
        let recorded = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CradleError::io_at("read monitor pid", &path, e))?;
        let pgid: libc::pid_t = recorded.trim().parse().map_err(|_| {
            CradleError::engine("release", format!("bad monitor pid in {}", path.display()))
        })?;

        signal_group(pgid, Signal::KILL)?;
        for _ in 0..MONITOR_EXIT_POLLS {
            if !group_alive(pgid) {
                tracing::debug!(container_id = %id, pgid, "Stopped blocked monitor");
                return Ok(());
            }
            tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;
        }
        Err(CradleError::engine(
            "release",
            format!("monitor process group {pgid} did not exit"),
        ))
    }
}

/// Wait until the start hook has run, or fail if the monitor exits first.
async fn wait_for_hook(monitor: &mut Child, log: &Path) -> CradleResult<()> {
    loop {
        if let Some(status) = monitor
            .try_wait()
            .map_err(|e| CradleError::engine("start init", e.to_string()))?
        {
            return Err(CradleError::engine(
                "start init",
                format!("{LXC_EXECUTE} exited before the container started: {status}"),
            ));
        }
        if hook::progress(log)? != HookProgress::NotStarted {
            return Ok(());
        }
        tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;
    }
}

#[async_trait]
impl ContainerEngine for LxcEngine {
    async fn exists(&self, id: &ContainerId) -> CradleResult<bool> {
        let path = self.paths.engine_config(id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CradleError::io_at("check engine config", path, e)),
        }
    }

    async fn load(&self, id: &ContainerId) -> CradleResult<EngineConfig> {
        EngineConfig::read_from(&self.paths.engine_config(id))
    }

    async fn save(&self, id: &ContainerId, config: &EngineConfig) -> CradleResult<()> {
        config.write_to(&self.paths.engine_config(id))
    }

    async fn running(&self, id: &ContainerId) -> CradleResult<bool> {
        if self.hook_progress(id)? == HookProgress::Waiting {
            return Ok(false);
        }
        Ok(self.lxc_state(id).await? == "RUNNING")
    }

    async fn start_init(&self, id: &ContainerId, stdio: InitStdio) -> CradleResult<()> {
        let config = self.paths.engine_config(id);

        let mut command = std::process::Command::new(LXC_EXECUTE);
        command
            .arg("-n")
            .arg(id.as_str())
            .arg("-P")
            .arg(&self.paths.root)
            .arg("-f")
            .arg(&config)
            .process_group(0);
        match stdio {
            InitStdio::Inherit => command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit()),
            InitStdio::Null => command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null()),
        };

        let mut monitor = Command::from(command).spawn().map_err(|e| {
            CradleError::engine("start init", format!("failed to run {LXC_EXECUTE}: {e}"))
        })?;
        if let Some(pid) = monitor.id() {
            let path = self.paths.monitor_pid(id);
            tokio::fs::write(&path, format!("{pid}\n"))
                .await
                .map_err(|e| CradleError::io_at("write monitor pid", &path, e))?;
        }
        tracing::debug!(container_id = %id, monitor_pid = ?monitor.id(), "Spawned LXC monitor");

        // LXC runs the start-host hook synchronously, so the monitor cannot
        // be queried until the barrier is released.
        wait_for_hook(&mut monitor, &self.paths.sync_hook_log(id)).await?;

        tracing::info!(container_id = %id, "Container init launched");
        Ok(())
    }

    async fn kill(&self, id: &ContainerId, signal: Signal) -> CradleResult<()> {
        if self.hook_progress(id)? == HookProgress::Waiting {
            return Err(CradleError::engine(
                "kill",
                "container init is blocked at the start barrier",
            ));
        }
        let reported = self.tool(LXC_INFO, "query init pid", id, &["-p", "-H"]).await?;
        let pid: libc::pid_t = reported.parse().map_err(|_| {
            CradleError::engine("kill", "container has no init process".to_string())
        })?;
        send_signal(pid, signal)
    }

    async fn release(&self, id: &ContainerId) -> CradleResult<()> {
        if self.hook_progress(id)? == HookProgress::Waiting {
            // Never ran the user program.
            self.stop_blocked_monitor(id).await?;
        } else if self.lxc_state(id).await? != "STOPPED" {
            self.tool(LXC_STOP, "stop", id, &["-k"]).await?;
        }
        self.tool(LXC_DESTROY, "destroy", id, &[]).await?;
        tracing::debug!(container_id = %id, "Released LXC container");
        Ok(())
    }
}

fn send_signal(pid: libc::pid_t, signal: Signal) -> CradleResult<()> {
    if pid <= 0 {
        return Err(CradleError::engine(
            "kill",
            format!("refusing to signal pid {pid}"),
        ));
    }

    // SAFETY: kill(2) only takes integers.
    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc == 0 {
        tracing::debug!(pid, %signal, "Signal sent");
        Ok(())
    } else {
        Err(CradleError::engine(
            "kill",
            format!(
                "failed to send {signal} to pid {pid}: {}",
                io::Error::last_os_error()
            ),
        ))
    }
}

fn signal_group(pgid: libc::pid_t, signal: Signal) -> CradleResult<()> {
    if pgid <= 1 {
        return Err(CradleError::engine(
            "kill",
            format!("refusing to signal process group {pgid}"),
        ));
    }

    // SAFETY: killpg(2) only takes integers.
    let rc = unsafe { libc::killpg(pgid, signal.as_raw()) };
    let err = io::Error::last_os_error();
    if rc == 0 || err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(CradleError::engine(
            "kill",
            format!("failed to send {signal} to process group {pgid}: {err}"),
        ))
    }
}

fn group_alive(pgid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::killpg(pgid, 0) == 0 }
}
