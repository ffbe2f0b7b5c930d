use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::args::StreamCommand;

/// Exit code of a finished child, `None` when it was killed by a signal.
pub type ExitCode = Option<i32>;

/// A child that has been created but not waited on by the caller.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub pid: u32,
    /// Resolves once the child has been reaped.
    pub exit: oneshot::Receiver<ExitCode>,
}

/// Creates and signals streaming processes.
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, command: &StreamCommand) -> io::Result<LaunchedProcess>;

    /// Asks the process to terminate. Does not wait for it to exit.
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Spawns real OS processes through tokio.
///
/// Children get their own process group and receive SIGTERM when this
/// process dies. Their output is discarded unless debug logging is enabled.
/// Must be used from within a tokio runtime.
///
/// Each child is owned by the task that waits on it. Termination requests go
/// to that task, which only signals while the child is still unreaped, so a
/// recycled pid is never hit.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher {
    live: Arc<Mutex<HashMap<u32, oneshot::Sender<()>>>>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        ProcessLauncher::default()
    }

    fn live(&self) -> std::sync::MutexGuard<'_, HashMap<u32, oneshot::Sender<()>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, command: &StreamCommand) -> io::Result<LaunchedProcess> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);

        if !log::log_enabled!(log::Level::Debug) {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        // SAFETY: the hook only makes async-signal-safe libc calls.
        unsafe {
            cmd.pre_exec(detach_from_parent);
        }

        let mut child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child has no pid"))?;

        let (tx, rx) = oneshot::channel();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        self.live().insert(pid, kill_tx);

        let live = Arc::clone(&self.live);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = &mut kill_rx => {
                    // `id()` is `None` once the child has been reaped.
                    if let Some(pid) = child.id() {
                        if let Err(e) = sigterm(pid) {
                            warn!("failed to signal streaming process {}: {}", pid, e);
                        }
                    }
                    child.wait().await
                }
            };
            live.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&pid);

            let code = match status {
                Ok(status) => {
                    debug!("streaming process {} exited: {}", pid, status);
                    status.code()
                }
                Err(e) => {
                    warn!("failed to wait on streaming process {}: {}", pid, e);
                    None
                }
            };
            let _ = tx.send(code);
        });

        Ok(LaunchedProcess { pid, exit: rx })
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        let exited = || io::Error::new(io::ErrorKind::NotFound, "process already exited");
        let kill = self.live().remove(&pid).ok_or_else(exited)?;
        kill.send(()).map_err(|_| exited())
    }
}

fn sigterm(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Runs in the child between fork and exec. The death signal is tied to the
/// spawning thread, which for tokio workers lives as long as the runtime.
fn detach_from_parent() -> io::Result<()> {
    unsafe {
        if libc::setpgid(0, 0) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
