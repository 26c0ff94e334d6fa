//! Auxiliary process lifecycle management.
//!
//! Blocker processes simulate files that are locked or in use while the
//! client under test runs. They are spawned detached into their own process
//! group and owned exclusively by the `ProcessManager` from spawn to
//! confirmed termination; the orchestrator only ever asks for teardown.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::{HarnessError, HarnessResult};

/// What a launched blocker does with its time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockerKind {
    /// Runs for a configured duration, then exits on its own.
    SelfExiting,
    /// Holds an open file handle until terminated or expired.
    LockHolding,
}

/// Public identity of a tracked auxiliary process.
#[derive(Debug, Clone)]
pub struct AuxiliaryHandle {
    pub pid: u32,
    pub kind: BlockerKind,
    pub owner_scenario: String,
}

struct Tracked {
    child: Child,
    handle: AuxiliaryHandle,
}

/// Owns every auxiliary process for one scenario run.
///
/// `terminate_all` is invoked unconditionally at scenario teardown; it must
/// survive processes that already exited and repeated invocation.
#[derive(Default)]
pub struct ProcessManager {
    tracked: Vec<Tracked>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a blocker detached from the harness's own process group.
    pub fn spawn(
        &mut self,
        executable: &Path,
        args: &[String],
        kind: BlockerKind,
        owner_scenario: &str,
    ) -> HarnessResult<AuxiliaryHandle> {
        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // A fresh process group so the blocker (and anything it spawns)
        // survives independently and can be terminated as a unit.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| {
            HarnessError::ProcessStartFailed(format!("{}: {e}", executable.display()))
        })?;

        let handle = AuxiliaryHandle {
            pid: child.id(),
            kind,
            owner_scenario: owner_scenario.to_string(),
        };
        debug!(pid = handle.pid, kind = ?kind, "blocker spawned");
        self.tracked.push(Tracked {
            child,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// PIDs of all tracked processes, in spawn order.
    pub fn pids(&self) -> Vec<u32> {
        self.tracked.iter().map(|t| t.handle.pid).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Terminate every tracked process and its descendants.
    ///
    /// Never errors: already-exited processes are reaped silently, and a
    /// failure to terminate one process does not skip the rest. Calling
    /// this again after it drained the tracked list is a no-op.
    pub fn terminate_all(&mut self) {
        for mut tracked in self.tracked.drain(..) {
            let pid = tracked.handle.pid;
            kill_group(pid);
            match tracked.child.wait() {
                Ok(status) => debug!(pid, %status, "blocker reaped"),
                Err(e) => warn!(pid, error = %e, "failed to reap blocker"),
            }
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

/// Kill the whole process group rooted at `pid`. Descendants spawned by the
/// blocker share its group, so one signal covers the subtree.
#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "blocker process group killed"),
        // Already gone, which teardown must treat as success.
        Err(Errno::ESRCH) => debug!(pid, "blocker process group already gone"),
        Err(e) => warn!(pid, error = %e, "failed to kill blocker process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
