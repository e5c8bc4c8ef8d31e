//! Generated start hook.
//!
//! LXC runs the hook in the host namespaces just before it executes the
//! container's init. The hook writes the readiness token into the sync fifo,
//! which blocks until `cradle start` reads it.
//!
//! While the hook is blocked, LXC's monitor does not answer state queries, so
//! the hook's progress log is the only way to tell how far a launch has got.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use cradle_common::{CradleError, CradleResult};

/// The hook must be executable by whatever user LXC runs hooks as.
const HOOK_MODE: u32 = 0o777;

/// Progress log line written right before the hook blocks.
const STARTED: &str = "started";
/// Progress log line written once `start` has drained the fifo.
const DONE: &str = "done";

/// How far a container's start hook has got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookProgress {
    /// The hook has not run yet, or failed before blocking.
    NotStarted,
    /// The hook is blocked on the sync fifo.
    Waiting,
    /// The barrier was released and the hook returned.
    Released,
}

/// Read the hook's progress log.
///
/// # Errors
///
/// Fails if the log exists but cannot be read.
pub fn progress(log: &Path) -> CradleResult<HookProgress> {
    let text = match std::fs::read_to_string(log) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HookProgress::NotStarted),
        Err(e) => return Err(CradleError::io_at("read sync hook log", log, e)),
    };

    let mut progress = HookProgress::NotStarted;
    for line in text.lines() {
        if line.starts_with(DONE) {
            return Ok(HookProgress::Released);
        }
        if line.starts_with(STARTED) {
            progress = HookProgress::Waiting;
        }
    }
    Ok(progress)
}

/// Quote a path for interpolation into a shell script.
pub(crate) fn quote_path(path: &Path) -> String {
    shell_escape::escape(Cow::Owned(path.to_string_lossy().into_owned())).into_owned()
}

/// Render the hook script for a fifo and a progress log.
#[must_use]
pub fn render(fifo: &Path, log: &Path) -> String {
    format!(
        r#"#!/bin/sh
fifo={fifo}
log={log}

[ -p "$fifo" ] || {{
    echo "error: $fifo not found or not a fifo" >&2
    exit 1
}}
echo "{STARTED}, waiting on $fifo" >>"$log"
echo "ready" >"$fifo"
echo "{DONE}, $fifo was read from" >>"$log"
"#,
        fifo = quote_path(fifo),
        log = quote_path(log),
    )
}

/// Write the hook script to `path`.
///
/// # Errors
///
/// Fails if anything already exists at `path` or the file cannot be written.
pub fn install(path: &Path, fifo: &Path, log: &Path) -> CradleResult<()> {
    let script = render(fifo, log);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(HOOK_MODE)
        .open(path)
        .map_err(|e| CradleError::io_at("write sync hook", path, e))?;
    file.write_all(script.as_bytes())
        .map_err(|e| CradleError::io_at("write sync hook", path, e))?;
    // The creation mode is filtered by the umask.
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(HOOK_MODE))
        .map_err(|e| CradleError::io_at("chmod sync hook", path, e))?;

    tracing::debug!(path = %path.display(), "Installed sync hook");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    use crate::runtime::barrier::SyncBarrier;

    fn run_hook(script: &str) -> std::process::Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    #[test]
    fn render_hook() {
        let script = render(
            Path::new("/var/lib/lxc/c1/syncfifo"),
            Path::new("/var/lib/lxc/c1/syncfifo-hook.log"),
        );
        insta::assert_snapshot!(script.trim_end(), @r#"
        #!/bin/sh
        fifo=/var/lib/lxc/c1/syncfifo
        log=/var/lib/lxc/c1/syncfifo-hook.log

        [ -p "$fifo" ] || {
            echo "error: $fifo not found or not a fifo" >&2
            exit 1
        }
        echo "started, waiting on $fifo" >>"$log"
        echo "ready" >"$fifo"
        echo "done, $fifo was read from" >>"$log"
        "#);
    }

    #[test]
    fn render_quotes_paths() {
        let script = render(
            Path::new("/srv/my containers/c1/syncfifo"),
            Path::new("/srv/my containers/c1/log"),
        );
        assert!(script.contains("fifo='/srv/my containers/c1/syncfifo'"));
    }

    #[test]
    fn install_is_executable_and_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let hook = dir.path().join("sync-fifo-wait");
        install(&hook, &dir.path().join("syncfifo"), &dir.path().join("log")).unwrap();

        let mode = std::fs::metadata(&hook).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, HOOK_MODE);
        assert!(
            std::fs::read_to_string(&hook)
                .unwrap()
                .starts_with("#!/bin/sh\n")
        );

        assert!(install(&hook, Path::new("/x"), Path::new("/y")).is_err());
    }

    #[test]
    fn hook_fails_without_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let plain = dir.path().join("plain");
        std::fs::write(&plain, "").unwrap();

        for fifo in [dir.path().join("missing"), plain] {
            let output = run_hook(&render(&fifo, &log)).wait_with_output().unwrap();
            assert_eq!(output.status.code(), Some(1));
            let stderr = String::from_utf8_lossy(&output.stderr);
            assert!(stderr.contains("not found or not a fifo"), "{stderr}");
        }
        assert_eq!(progress(&log).unwrap(), HookProgress::NotStarted);
    }

    #[test]
    fn hook_progress_follows_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("syncfifo");
        let log = dir.path().join("log");
        let barrier = SyncBarrier::new(&fifo);
        barrier.provision().unwrap();

        assert_eq!(progress(&log).unwrap(), HookProgress::NotStarted);
        let mut hook = run_hook(&render(&fifo, &log));

        let mut waited = 0;
        while progress(&log).unwrap() != HookProgress::Waiting {
            assert!(waited < 500, "hook never reached the barrier");
            std::thread::sleep(Duration::from_millis(10));
            waited += 1;
        }

        assert_eq!(barrier.release().unwrap(), b"ready\n");
        assert!(hook.wait().unwrap().success());
        assert_eq!(progress(&log).unwrap(), HookProgress::Released);
    }
}
