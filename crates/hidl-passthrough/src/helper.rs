//! Helper process supervision.
//!
//! The helper is started with the host's control protocol address as its only
//! argument. Its stdout is handed back as a descriptor for the output pump;
//! stderr is inherited. Teardown signals the helper and reaps it.

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use crate::error::SpawnError;

pub const HELPER_NAME: &str = "hidl-passthrough-helper";

/// Install directory used when `HIDL_HELPER_LOCATION` is not set at build time.
pub const DEFAULT_HELPER_LOCATION: &str = "/usr/libexec/pulse";

/// Well-known install location of the helper binary.
pub fn default_helper_binary() -> PathBuf {
    Path::new(option_env!("HIDL_HELPER_LOCATION").unwrap_or(DEFAULT_HELPER_LOCATION))
        .join(HELPER_NAME)
}

/// A started helper: its pid and the read end of its stdout.
#[derive(Debug)]
pub struct SpawnedHelper {
    pub pid: Pid,
    pub output: OwnedFd,
}

/// Extension point for how the helper gets started.
pub trait HelperSpawner: Send + Sync {
    fn spawn(&self, binary: &Path, address: &str) -> Result<SpawnedHelper, SpawnError>;
}

/// Spawns the helper as a plain child process.
pub struct CommandSpawner;

impl HelperSpawner for CommandSpawner {
    fn spawn(&self, binary: &Path, address: &str) -> Result<SpawnedHelper, SpawnError> {
        let mut child = Command::new(binary)
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let (Some(stdout), Ok(raw_pid)) = (child.stdout.take(), i32::try_from(child.id())) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SpawnError::NoOutput);
        };

        Ok(SpawnedHelper {
            pid: Pid::from_raw(raw_pid),
            output: OwnedFd::from(stdout),
        })
    }
}

/// Starts and stops the helper binary.
pub struct HelperSupervisor {
    spawner: Arc<dyn HelperSpawner>,
    binary: PathBuf,
}

impl HelperSupervisor {
    pub fn new(spawner: Arc<dyn HelperSpawner>, binary: impl Into<PathBuf>) -> Self {
        Self {
            spawner,
            binary: binary.into(),
        }
    }

    /// Start the helper, passing `address` as its sole argument.
    ///
    /// On failure nothing is left running under our supervision.
    pub fn spawn(&self, address: &str) -> Result<SpawnedHelper, SpawnError> {
        tracing::debug!(binary = %self.binary.display(), address, "Spawning helper");
        self.spawner.spawn(&self.binary, address)
    }

    /// Send SIGTERM to `pid` and block until it has been reaped.
    ///
    /// Waits without a deadline; a helper ignoring SIGTERM blocks the caller.
    /// Must be called at most once per spawned helper.
    pub fn terminate(pid: Pid) {
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            tracing::debug!(%pid, error = %e, "Failed to signal helper");
        }

        loop {
            match waitpid(pid, None) {
                Ok(status) => {
                    tracing::debug!(%pid, ?status, "Helper reaped");
                    break;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::error!(%pid, error = %e, "waitpid() failed");
                    break;
                }
            }
        }
    }
}
