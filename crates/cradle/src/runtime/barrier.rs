//! Named-pipe start barrier.
//!
//! `create` provisions a fifo in the container directory and registers a
//! start hook that writes a readiness token into it. Opening a fifo for
//! writing blocks until a reader attaches, so the container's init sits in
//! the hook until `start` opens the fifo for reading and drains it.
//!
//! The two sides run in unrelated processes, possibly far apart in time. The
//! fifo is their only shared state.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cradle_common::{CradleError, CradleResult};

/// Permissions of the fifo: owner read/write, everyone else write.
const FIFO_MODE: u32 = 0o622;

/// Filesystem operations the barrier needs.
///
/// [`HostFifo`] performs them on real named pipes; tests can substitute an
/// in-memory implementation.
pub trait FifoOps: Send + Sync + fmt::Debug {
    /// Returns true if a fifo exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Create a fifo at `path`, failing if anything already exists there.
    fn create(&self, path: &Path) -> io::Result<()>;

    /// Open `path` for reading and read until end-of-stream.
    fn read_to_end(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Open `path` for writing and write `data`.
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Remove the fifo at `path`.
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// [`FifoOps`] on the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFifo;

impl FifoOps for HostFifo {
    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_fifo())
    }

    fn create(&self, path: &Path) -> io::Result<()> {
        use rustix::fs::{CWD, FileType, Mode, mknodat};

        mknodat(
            CWD,
            path,
            FileType::Fifo,
            Mode::from_raw_mode(FIFO_MODE),
            0,
        )?;
        // mknod honours the umask; the hook may run as another user.
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(FIFO_MODE))
    }

    fn read_to_end(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut fifo = File::open(path)?;
        let mut data = Vec::new();
        fifo.read_to_end(&mut data)?;
        Ok(data)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut fifo = OpenOptions::new().write(true).open(path)?;
        fifo.write_all(data)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// One-shot rendezvous between a container's start hook and `cradle start`.
#[derive(Debug, Clone)]
pub struct SyncBarrier {
    path: PathBuf,
    ops: Arc<dyn FifoOps>,
}

impl SyncBarrier {
    /// Token the start hook writes once it reaches the barrier.
    pub const READY_TOKEN: &'static [u8] = b"ready\n";

    /// A barrier backed by a host fifo at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_ops(path, Arc::new(HostFifo))
    }

    /// A barrier using custom fifo operations.
    pub fn with_ops(path: impl Into<PathBuf>, ops: Arc<dyn FifoOps>) -> Self {
        Self {
            path: path.into(),
            ops,
        }
    }

    /// Location of the fifo.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while the fifo exists, i.e. the barrier has not been released.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.ops.exists(&self.path)
    }

    /// Create the fifo.
    ///
    /// # Errors
    ///
    /// Fails if anything already exists at the path or the fifo cannot be
    /// created. A conflicting path is never retried.
    pub fn provision(&self) -> CradleResult<()> {
        self.ops
            .create(&self.path)
            .map_err(|e| CradleError::io_at("create sync fifo", &self.path, e))?;
        tracing::debug!(path = %self.path.display(), "Provisioned sync fifo");
        Ok(())
    }

    /// Blocking side: write the readiness token.
    ///
    /// Blocks until a reader attaches. This is what the generated start hook
    /// does from the shell.
    ///
    /// # Errors
    ///
    /// Fails with [`CradleError::BarrierMissing`] if there is no fifo.
    pub fn signal_ready(&self) -> CradleResult<()> {
        if !self.is_armed() {
            return Err(CradleError::BarrierMissing {
                path: self.path.clone(),
            });
        }
        self.ops
            .write(&self.path, Self::READY_TOKEN)
            .map_err(|e| CradleError::io_at("write sync fifo", &self.path, e))
    }

    /// Release side: drain the fifo and remove it.
    ///
    /// Blocks until the writer attaches and closes its end. Returns the
    /// drained bytes. The fifo is removed only after a successful drain, so a
    /// released barrier can never be released again.
    ///
    /// # Errors
    ///
    /// Fails with [`CradleError::BarrierMissing`] if there is no fifo, and
    /// with [`CradleError::BarrierInterrupted`] if the writer closed without
    /// sending anything.
    pub fn release(&self) -> CradleResult<Vec<u8>> {
        if !self.is_armed() {
            return Err(CradleError::BarrierMissing {
                path: self.path.clone(),
            });
        }

        tracing::debug!(path = %self.path.display(), "Opening sync fifo");
        let data = self
            .ops
            .read_to_end(&self.path)
            .map_err(|e| CradleError::io_at("read sync fifo", &self.path, e))?;

        if data.is_empty() {
            return Err(CradleError::BarrierInterrupted {
                path: self.path.clone(),
            });
        }

        self.ops
            .remove(&self.path)
            .map_err(|e| CradleError::io_at("remove sync fifo", &self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            token = %String::from_utf8_lossy(&data).trim_end(),
            "Drained sync fifo"
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use parking_lot::Mutex;

    /// Fifo stand-in: a map from path to the bytes a writer left behind.
    #[derive(Debug, Default)]
    struct MemoryFifo {
        fifos: Mutex<HashMap<PathBuf, Vec<u8>>>,
    }

    impl FifoOps for MemoryFifo {
        fn exists(&self, path: &Path) -> bool {
            self.fifos.lock().contains_key(path)
        }

        fn create(&self, path: &Path) -> io::Result<()> {
            let mut fifos = self.fifos.lock();
            if fifos.contains_key(path) {
                return Err(io::ErrorKind::AlreadyExists.into());
            }
            fifos.insert(path.to_path_buf(), Vec::new());
            Ok(())
        }

        fn read_to_end(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.fifos
                .lock()
                .get_mut(path)
                .map(std::mem::take)
                .ok_or_else(|| io::ErrorKind::NotFound.into())
        }

        fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
            self.fifos
                .lock()
                .get_mut(path)
                .map(|buf| buf.extend_from_slice(data))
                .ok_or_else(|| io::ErrorKind::NotFound.into())
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            self.fifos
                .lock()
                .remove(path)
                .map(drop)
                .ok_or_else(|| io::ErrorKind::NotFound.into())
        }
    }

    fn memory_barrier() -> SyncBarrier {
        SyncBarrier::with_ops("/c1/syncfifo", Arc::new(MemoryFifo::default()))
    }

    #[test]
    fn provision_is_exclusive() {
        let barrier = memory_barrier();
        barrier.provision().unwrap();
        assert!(barrier.is_armed());

        let err = barrier.provision().unwrap_err();
        assert!(matches!(err, CradleError::IoAt { .. }));
    }

    #[test]
    fn release_is_one_shot() {
        let barrier = memory_barrier();
        barrier.provision().unwrap();
        barrier.signal_ready().unwrap();

        assert_eq!(barrier.release().unwrap(), SyncBarrier::READY_TOKEN);
        assert!(!barrier.is_armed());

        let err = barrier.release().unwrap_err();
        assert!(matches!(err, CradleError::BarrierMissing { .. }));
    }

    #[test]
    fn release_without_fifo() {
        let err = memory_barrier().release().unwrap_err();
        assert!(matches!(err, CradleError::BarrierMissing { .. }));
    }

    #[test]
    fn signal_without_fifo() {
        let err = memory_barrier().signal_ready().unwrap_err();
        assert!(matches!(err, CradleError::BarrierMissing { .. }));
    }

    #[test]
    fn empty_drain_keeps_fifo() {
        let barrier = memory_barrier();
        barrier.provision().unwrap();

        let err = barrier.release().unwrap_err();
        assert!(matches!(err, CradleError::BarrierInterrupted { .. }));
        assert!(barrier.is_armed());
    }

    #[test]
    fn host_fifo_provision() {
        let dir = tempfile::tempdir().unwrap();
        let barrier = SyncBarrier::new(dir.path().join("syncfifo"));
        barrier.provision().unwrap();

        let meta = std::fs::symlink_metadata(barrier.path()).unwrap();
        assert!(meta.file_type().is_fifo());
        assert_eq!(meta.permissions().mode() & 0o777, FIFO_MODE);

        assert!(barrier.provision().is_err());
    }

    #[test]
    fn host_fifo_not_a_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncfifo");
        std::fs::write(&path, "plain file").unwrap();

        let barrier = SyncBarrier::new(&path);
        assert!(!barrier.is_armed());
        assert!(matches!(
            barrier.release().unwrap_err(),
            CradleError::BarrierMissing { .. }
        ));
    }

    #[test]
    fn host_fifo_rendezvous() {
        let dir = tempfile::tempdir().unwrap();
        let barrier = SyncBarrier::new(dir.path().join("syncfifo"));
        barrier.provision().unwrap();

        let writer = barrier.clone();
        let hook = std::thread::spawn(move || writer.signal_ready());

        let token = barrier.release().unwrap();
        hook.join().unwrap().unwrap();

        assert_eq!(token, SyncBarrier::READY_TOKEN);
        assert!(!barrier.path().exists());
    }

    #[test]
    fn host_fifo_writer_dies() {
        let dir = tempfile::tempdir().unwrap();
        let barrier = SyncBarrier::new(dir.path().join("syncfifo"));
        barrier.provision().unwrap();

        let path = barrier.path().to_path_buf();
        let hook = std::thread::spawn(move || {
            drop(OpenOptions::new().write(true).open(path).unwrap());
        });

        let err = barrier.release().unwrap_err();
        hook.join().unwrap();
        assert!(matches!(err, CradleError::BarrierInterrupted { .. }));
        assert!(barrier.is_armed());
    }
}
