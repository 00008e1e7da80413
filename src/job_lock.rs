use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Cross-process lock held for as long as a job of the given name runs.
/// Two processes can never run the same job at the same time.
#[derive(Debug)]
pub struct JobLock {
    lock_file: File,
    lock_path: PathBuf,
}

impl JobLock {
    /// Lock `name` in the runtime directory
    pub fn acquire(name: &str) -> Result<Self> {
        Self::acquire_in(&runtime_dir(), name)
    }

    /// Lock `name` in `dir`; fails immediately if another holder exists
    pub fn acquire_in(dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).context("Failed to create lock directory")?;
        let lock_path = dir.join(format!("flightlink-{}.lock", name));

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open lock file")?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    anyhow::bail!(
                        "Job '{}' is already running. Lock file: {}",
                        name,
                        lock_path.display()
                    );
                }
                return Err(err).context("Failed to acquire job lock");
            }
        }

        lock_file.set_len(0).context("Failed to truncate lock file")?;
        let mut writer = lock_file
            .try_clone()
            .context("Failed to clone file handle")?;
        writeln!(writer, "{}", std::process::id()).context("Failed to write PID to lock file")?;

        debug!("Acquired job lock {}", lock_path.display());

        Ok(Self {
            lock_file,
            lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

impl Drop for JobLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.lock_file.as_raw_fd();
            unsafe {
                libc::flock(fd, libc::LOCK_UN);
            }
        }
        debug!("Released job lock {}", self.lock_path.display());
    }
}
