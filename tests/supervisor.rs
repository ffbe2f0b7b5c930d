use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use wfd_source::launcher::{ExitCode, LaunchedProcess};
use wfd_source::method::ToolProbe;
use wfd_source::{
    Backend, ErrorKind, Launcher, MethodPreference, ProcessLauncher, StopOutcome, StreamCommand,
    StreamRequest, StreamSource, StreamStatus,
};

/// Records launches instead of creating processes. Exit senders are kept so
/// children stay "alive" until a test ends them.
#[derive(Default)]
struct RecordingLauncher {
    next_pid: AtomicU32,
    fail_with: Mutex<Option<io::ErrorKind>>,
    launched: Mutex<Vec<StreamCommand>>,
    terminated: Mutex<Vec<u32>>,
    exits: Mutex<Vec<(u32, oneshot::Sender<ExitCode>)>>,
}

impl RecordingLauncher {
    fn programs(&self) -> Vec<String> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.program.clone())
            .collect()
    }

    fn exit(&self, pid: u32, code: ExitCode) {
        let mut exits = self.exits.lock().unwrap();
        let idx = exits.iter().position(|(p, _)| *p == pid).unwrap();
        let (_, tx) = exits.remove(idx);
        tx.send(code).unwrap();
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, command: &StreamCommand) -> io::Result<LaunchedProcess> {
        if let Some(kind) = *self.fail_with.lock().unwrap() {
            return Err(io::Error::from(kind));
        }
        let pid = 500 + self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.exits.lock().unwrap().push((pid, tx));
        self.launched.lock().unwrap().push(command.clone());
        Ok(LaunchedProcess { pid, exit: rx })
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        self.terminated.lock().unwrap().push(pid);
        Ok(())
    }
}

struct Installed(HashSet<&'static str>);

impl Installed {
    fn only(tools: &[&'static str]) -> Self {
        Installed(tools.iter().copied().collect())
    }
}

impl ToolProbe for Installed {
    fn is_available(&self, program: &str) -> bool {
        self.0.contains(program)
    }
}

fn source(tools: &[&'static str]) -> StreamSource<RecordingLauncher> {
    StreamSource::with_parts(
        MethodPreference::Auto,
        RecordingLauncher::default(),
        Installed::only(tools),
    )
}

fn request() -> StreamRequest {
    StreamRequest {
        port: 5004,
        width: 1280,
        height: 720,
        fps: 25,
        bitrate: 4000,
        audio: false,
    }
}

#[tokio::test]
async fn second_start_is_rejected_and_first_child_kept() {
    let source = source(&["gst-launch-1.0"]);
    let pid = source.start(Some("10.0.0.5"), request()).await.unwrap();

    let err = source.start(Some("10.0.0.6"), request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyRunning);
    assert_eq!(source.last_error_kind().await, ErrorKind::AlreadyRunning);
    assert!(source
        .last_error_message()
        .await
        .contains(&format!("PID {}", pid)));

    assert_eq!(source.pid().await, Some(pid));
    assert_eq!(source.target_address().await.as_deref(), Some("10.0.0.5"));
    assert_eq!(source.launcher().programs().len(), 1);
    assert!(source.launcher().terminated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_or_missing_target_is_invalid() {
    let source = source(&["gst-launch-1.0"]);

    for target in [None, Some("")] {
        let err = source.start(target, request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert_eq!(source.last_error_message().await, "No target IP provided");
    }
    assert!(!source.is_active().await);
    assert!(source.launcher().programs().is_empty());
}

#[tokio::test]
async fn zero_parameters_use_defaults() {
    let source = source(&["ffmpeg"]);
    let zero = StreamRequest {
        port: 0,
        width: 0,
        height: 0,
        fps: 0,
        bitrate: 0,
        audio: true,
    };
    source.start(Some("10.0.0.5"), zero).await.unwrap();

    let params = source.params().await;
    assert_eq!(params.port, 8554);
    assert_eq!(params.fps, 30);
    assert_eq!(params.bitrate, 8192);
    assert_eq!(params.resolution(), None);

    let launched = source.launcher().launched.lock().unwrap().clone();
    assert_eq!(
        launched[0].args.join(" "),
        "-f x11grab -r 30 -i :0.0 -vcodec libx264 -preset ultrafast \
         -tune zerolatency -b:v 8192k -f rtp rtp://10.0.0.5:8554"
    );
}

#[tokio::test]
async fn stop_when_idle_reports_not_running() {
    let source = source(&[]);
    source
        .set_method_preference(Backend::Vlc.into())
        .await;
    let before = source.params().await;

    assert_eq!(source.stop().await, StopOutcome::NotRunning);
    assert_eq!(source.last_error_kind().await, ErrorKind::NotRunning);
    assert_eq!(source.last_error_message().await, "No stream is running");
    assert_eq!(
        source.method_preference().await,
        MethodPreference::Pinned(Backend::Vlc)
    );
    assert_eq!(source.params().await, before);
}

#[tokio::test]
async fn stop_clears_target_but_keeps_params() {
    let source = source(&["cvlc"]);
    let pid = source.start(Some("10.0.0.5"), request()).await.unwrap();
    assert!(source.is_active().await);

    assert_eq!(source.stop().await, StopOutcome::Stopped { pid });
    assert_eq!(source.last_error_kind().await, ErrorKind::None);
    assert!(!source.is_active().await);
    assert_eq!(source.target_address().await, None);
    assert_eq!(source.params().await, request().effective());
    assert_eq!(*source.launcher().terminated.lock().unwrap(), vec![pid]);

    // slot is free again
    source.start(Some("10.0.0.7"), request()).await.unwrap();
    assert_eq!(source.launcher().programs(), vec!["cvlc", "cvlc"]);
}

#[tokio::test]
async fn explicit_preference_bypasses_probe() {
    let source = source(&["gst-launch-1.0", "ffmpeg"]);
    source.set_method_preference(Backend::Vlc.into()).await;
    source.start(Some("10.0.0.5"), request()).await.unwrap();

    let launched = source.launcher().launched.lock().unwrap().clone();
    assert_eq!(launched[0].backend, Backend::Vlc);
    assert_eq!(launched[0].program, "cvlc");
    assert_eq!(launched[0].args[0], "screen://");
}

#[tokio::test]
async fn no_tools_falls_back_to_gstreamer() {
    let source = source(&[]);
    source.start(Some("10.0.0.5"), request()).await.unwrap();
    assert_eq!(source.launcher().programs(), vec!["gst-launch-1.0"]);
}

#[tokio::test]
async fn spawn_failure_leaves_session_untouched() {
    let source = source(&["ffmpeg"]);
    *source.launcher().fail_with.lock().unwrap() = Some(io::ErrorKind::NotFound);

    let err = source.start(Some("10.0.0.5"), request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecFailed);
    assert!(!source.is_active().await);
    assert_eq!(source.target_address().await, None);
    assert_eq!(source.params().await, StreamRequest::default().effective());

    *source.launcher().fail_with.lock().unwrap() = Some(io::ErrorKind::OutOfMemory);
    let err = source.start(Some("10.0.0.5"), request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ForkFailed);
}

#[tokio::test]
async fn out_of_range_port_replaces_previous_error() {
    let source = source(&["gst-launch-1.0"]);
    assert_eq!(source.stop().await, StopOutcome::NotRunning);

    let wide = StreamRequest {
        port: 70000,
        ..request()
    };
    let err = source.start(Some("10.0.0.5"), wide).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
    assert_eq!(source.last_error_kind().await, ErrorKind::InvalidParams);
    assert_eq!(source.last_error_message().await, "Port out of range");
    assert!(!source.is_active().await);
    assert!(source.launcher().programs().is_empty());

    let highest = StreamRequest {
        port: 65535,
        ..request()
    };
    source.start(Some("10.0.0.5"), highest).await.unwrap();
    assert_eq!(source.params().await.port, 65535);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_launch_exactly_one_child() {
    const CALLERS: usize = 32;
    let source = source(&["ffmpeg"]);

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let source = source.clone();
            tokio::spawn(async move {
                let target = format!("10.0.0.{}", i + 1);
                source.start(Some(target.as_str()), request()).await
            })
        })
        .collect();

    let mut started = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::AlreadyRunning);
                rejected += 1;
            }
        }
    }

    assert_eq!(started, 1);
    assert_eq!(rejected, CALLERS - 1);
    assert_eq!(source.launcher().launched.lock().unwrap().len(), 1);
    assert!(source.is_active().await);
}

#[tokio::test]
async fn child_exit_frees_the_slot_without_touching_last_error() {
    let source = source(&["gst-launch-1.0"]);
    let mut status = source.subscribe();
    let pid = source.start(Some("10.0.0.5"), request()).await.unwrap();

    source.launcher().exit(pid, Some(1));
    let exited = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| matches!(s, StreamStatus::Exited { .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    assert_eq!(exited, StreamStatus::Exited { pid, code: Some(1) });
    assert!(!source.is_active().await);
    assert_eq!(source.last_error_kind().await, ErrorKind::None);
    assert_eq!(source.stop().await, StopOutcome::NotRunning);
}

#[tokio::test]
async fn dropping_last_handle_terminates_child() {
    let source = StreamSource::with_parts(
        MethodPreference::Auto,
        ProcessWrapper::new("sleep", &["30"]),
        Installed::only(&["ffmpeg"]),
    );
    let pid = source.start(Some("127.0.0.1"), request()).await.unwrap();
    let mut exit = source.launcher().take_exit(pid);

    let handle = source.clone();
    drop(source);
    assert!(handle.is_active().await);
    drop(handle);

    let code = tokio::time::timeout(Duration::from_secs(5), &mut exit)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, None);
}

#[tokio::test]
async fn real_process_lifecycle() {
    let source = StreamSource::with_parts(
        MethodPreference::Pinned(Backend::GStreamer),
        ProcessWrapper::new("sh", &["-c", "exit 2"]),
        Installed::only(&[]),
    );
    let mut status = source.subscribe();
    let pid = source.start(Some("127.0.0.1"), request()).await.unwrap();
    assert!(pid > 0);

    let exited = tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| matches!(s, StreamStatus::Exited { .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(exited, StreamStatus::Exited { pid, code: Some(2) });
    assert!(!source.is_active().await);
}

#[tokio::test]
async fn stop_signals_real_process() {
    let source = StreamSource::with_parts(
        MethodPreference::Auto,
        ProcessWrapper::new("sleep", &["30"]),
        Installed::only(&[]),
    );
    let mut status = source.subscribe();
    let pid = source.start(Some("127.0.0.1"), request()).await.unwrap();
    let exit = source.launcher().take_exit(pid);

    assert_eq!(source.stop().await, StopOutcome::Stopped { pid });
    assert_eq!(*status.borrow_and_update(), StreamStatus::Stopped { pid });

    let code = tokio::time::timeout(Duration::from_secs(5), exit)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, None);
}

/// Runs a harmless stand-in program through the real launcher, and tees the
/// exit notification so tests can observe it too.
struct ProcessWrapper {
    inner: ProcessLauncher,
    program: &'static str,
    args: Vec<String>,
    exits: Mutex<Vec<(u32, oneshot::Receiver<ExitCode>)>>,
}

impl ProcessWrapper {
    fn new(program: &'static str, args: &[&str]) -> Self {
        ProcessWrapper {
            inner: ProcessLauncher::new(),
            program,
            args: args.iter().map(|a| a.to_string()).collect(),
            exits: Mutex::new(Vec::new()),
        }
    }

    fn take_exit(&self, pid: u32) -> oneshot::Receiver<ExitCode> {
        let mut exits = self.exits.lock().unwrap();
        let idx = exits.iter().position(|(p, _)| *p == pid).unwrap();
        exits.remove(idx).1
    }
}

impl Launcher for ProcessWrapper {
    fn launch(&self, command: &StreamCommand) -> io::Result<LaunchedProcess> {
        let stand_in = StreamCommand {
            backend: command.backend,
            program: self.program.to_string(),
            args: self.args.clone(),
        };
        let launched = self.inner.launch(&stand_in)?;

        let (to_source, from_wrapper) = oneshot::channel();
        let (to_test, from_test) = oneshot::channel();
        let exit = launched.exit;
        tokio::spawn(async move {
            if let Ok(code) = exit.await {
                let _ = to_source.send(code);
                let _ = to_test.send(code);
            }
        });
        self.exits.lock().unwrap().push((launched.pid, from_test));

        Ok(LaunchedProcess {
            pid: launched.pid,
            exit: from_wrapper,
        })
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        self.inner.terminate(pid)
    }
}
