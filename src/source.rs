use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};

use crate::args::{StreamCommand, StreamParams, StreamRequest, MAX_PORT};
use crate::error::{ErrorKind, LastError, SourceError};
use crate::launcher::{LaunchedProcess, Launcher, ProcessLauncher};
use crate::method::{select_backend, Backend, MethodPreference, PathProbe, ToolProbe};
use crate::session::{StreamSession, StreamStatus};

const NOT_RUNNING_MESSAGE: &str = "No stream is running";

/// Result of a stop request. Stopping an idle source is not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped { pid: u32 },
    NotRunning,
}

impl StopOutcome {
    pub fn kind(self) -> ErrorKind {
        match self {
            StopOutcome::Stopped { .. } => ErrorKind::None,
            StopOutcome::NotRunning => ErrorKind::NotRunning,
        }
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Stopped { pid } => write!(f, "Stopped streaming process {}", pid),
            StopOutcome::NotRunning => f.write_str(NOT_RUNNING_MESSAGE),
        }
    }
}

/// Point-in-time copy of the session, taken under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub pid: Option<u32>,
    pub backend: Option<Backend>,
    pub target_address: Option<String>,
    pub params: StreamParams,
    pub preference: MethodPreference,
    pub last_error: LastError,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.pid.is_some()
    }
}

/// Supervises at most one external streaming process.
///
/// Cloning yields another handle to the same slot. When the last handle is
/// dropped a running child is terminated exactly as by [`StreamSource::stop`].
pub struct StreamSource<L: Launcher = ProcessLauncher> {
    shared: Arc<Shared<L>>,
}

struct Shared<L: Launcher> {
    session: Mutex<StreamSession>,
    launcher: L,
    probe: Box<dyn ToolProbe>,
    status: watch::Sender<StreamStatus>,
}

impl<L: Launcher> Clone for StreamSource<L> {
    fn clone(&self) -> Self {
        StreamSource {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl StreamSource<ProcessLauncher> {
    pub fn new(preference: MethodPreference) -> Self {
        StreamSource::with_parts(preference, ProcessLauncher::new(), PathProbe::from_env())
    }
}

impl Default for StreamSource<ProcessLauncher> {
    fn default() -> Self {
        StreamSource::new(MethodPreference::Auto)
    }
}

impl<L: Launcher> StreamSource<L> {
    pub fn with_parts(
        preference: MethodPreference,
        launcher: L,
        probe: impl ToolProbe + 'static,
    ) -> Self {
        let (status, _) = watch::channel(StreamStatus::Idle);
        StreamSource {
            shared: Arc::new(Shared {
                session: Mutex::new(StreamSession::new(preference)),
                launcher,
                probe: Box::new(probe),
                status,
            }),
        }
    }

    /// Launches a stream to `target` and returns the child's pid.
    ///
    /// Fails without touching the current session when a stream is already
    /// running, when `target` is missing or empty, or when the process
    /// cannot be created. The outcome is also recorded as the last error.
    pub async fn start(
        &self,
        target: Option<&str>,
        request: StreamRequest,
    ) -> Result<u32, SourceError> {
        let mut session = self.shared.session.lock().await;
        session.last_error_mut().clear();

        let result = self.start_locked(&mut session, target, request);
        if let Err(e) = &result {
            error!("{}", e);
            session.last_error_mut().record(e);
        }
        result
    }

    fn start_locked(
        &self,
        session: &mut StreamSession,
        target: Option<&str>,
        request: StreamRequest,
    ) -> Result<u32, SourceError> {
        if let Some(pid) = session.pid() {
            return Err(SourceError::AlreadyRunning { pid });
        }

        let target = match target {
            Some(t) if !t.is_empty() => t,
            _ => return Err(SourceError::InvalidParams("No target IP provided".into())),
        };

        let params = request.effective();
        if params.port > MAX_PORT {
            return Err(SourceError::InvalidParams("Port out of range".into()));
        }
        let backend = select_backend(session.preference(), self.shared.probe.as_ref());

        info!(
            "Using {} for streaming to {}:{} (resolution: {}, fps: {}, bitrate: {})...",
            backend,
            target,
            params.port,
            params.resolution_label(),
            params.fps,
            params.bitrate
        );

        let command = StreamCommand::new(backend, target, &params);
        debug!("launching {}", command);

        let launched = self
            .shared
            .launcher
            .launch(&command)
            .map_err(|e| SourceError::from_spawn(backend.name(), e))?;
        let pid = launched.pid;

        let generation = session.begin(pid, backend, target, params);
        self.shared.status.send_replace(StreamStatus::Streaming {
            pid,
            backend,
            target: target.to_string(),
        });
        self.watch_exit(generation, launched);

        info!(
            "Started screen streaming to {}:{} with PID {}",
            target, params.port, pid
        );
        Ok(pid)
    }

    /// Releases the slot when the child exits on its own. The last error is
    /// left alone; exit is reported through the status channel only.
    fn watch_exit(&self, generation: u64, launched: LaunchedProcess) {
        let shared: Weak<Shared<L>> = Arc::downgrade(&self.shared);
        let LaunchedProcess { pid, exit } = launched;

        tokio::spawn(async move {
            let Ok(code) = exit.await else {
                return;
            };
            let Some(shared) = shared.upgrade() else {
                return;
            };

            let mut session = shared.session.lock().await;
            if session.release_generation(generation).is_some() {
                match code {
                    Some(code) => warn!("streaming process {} exited with status {}", pid, code),
                    None => warn!("streaming process {} was killed by a signal", pid),
                }
                shared
                    .status
                    .send_replace(StreamStatus::Exited { pid, code });
            } else {
                debug!("streaming process {} reaped after stop", pid);
            }
        });
    }

    /// Sends SIGTERM to the running child and empties the slot. Does not wait
    /// for the child to exit.
    pub async fn stop(&self) -> StopOutcome {
        let mut session = self.shared.session.lock().await;
        session.last_error_mut().clear();

        let Some(child) = session.release() else {
            session
                .last_error_mut()
                .set(ErrorKind::NotRunning, NOT_RUNNING_MESSAGE);
            info!("{}", NOT_RUNNING_MESSAGE);
            return StopOutcome::NotRunning;
        };

        if let Err(e) = self.shared.launcher.terminate(child.pid) {
            warn!("failed to signal streaming process {}: {}", child.pid, e);
        }
        self.shared
            .status
            .send_replace(StreamStatus::Stopped { pid: child.pid });
        info!("Stopped screen streaming");

        StopOutcome::Stopped { pid: child.pid }
    }

    pub async fn is_active(&self) -> bool {
        self.shared.session.lock().await.is_active()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.shared.session.lock().await.pid()
    }

    pub async fn target_address(&self) -> Option<String> {
        self.shared
            .session
            .lock()
            .await
            .target_address()
            .map(str::to_string)
    }

    /// Parameters applied by the most recent successful start.
    pub async fn params(&self) -> StreamParams {
        self.shared.session.lock().await.params()
    }

    pub async fn method_preference(&self) -> MethodPreference {
        self.shared.session.lock().await.preference()
    }

    /// Takes effect on the next start.
    pub async fn set_method_preference(&self, preference: MethodPreference) {
        self.shared.session.lock().await.set_preference(preference);
    }

    pub async fn last_error_kind(&self) -> ErrorKind {
        self.shared.session.lock().await.last_error().kind
    }

    pub async fn last_error_message(&self) -> String {
        self.shared.session.lock().await.last_error().message.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let session = self.shared.session.lock().await;
        SessionSnapshot {
            pid: session.pid(),
            backend: session.backend(),
            target_address: session.target_address().map(str::to_string),
            params: session.params(),
            preference: session.preference(),
            last_error: session.last_error().clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.shared.status.subscribe()
    }

    pub fn launcher(&self) -> &L {
        &self.shared.launcher
    }
}

impl<L: Launcher> Drop for Shared<L> {
    fn drop(&mut self) {
        if let Some(child) = self.session.get_mut().release() {
            info!("terminating streaming process {} on shutdown", child.pid);
            if let Err(e) = self.launcher.terminate(child.pid) {
                warn!("failed to signal streaming process {}: {}", child.pid, e);
            }
        }
    }
}
