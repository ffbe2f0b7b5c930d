use std::fmt;
use std::io;

/// Outcome classification of the most recent start/stop call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    #[default]
    None,
    AlreadyRunning,
    InvalidParams,
    ForkFailed,
    ExecFailed,
    NotRunning,
}

impl ErrorKind {
    /// Numeric code used on the control interface.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::None => 0,
            ErrorKind::AlreadyRunning => -1,
            ErrorKind::InvalidParams => -2,
            ErrorKind::ForkFailed => -3,
            ErrorKind::ExecFailed => -4,
            ErrorKind::NotRunning => -5,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::None => "none",
            ErrorKind::AlreadyRunning => "already running",
            ErrorKind::InvalidParams => "invalid parameters",
            ErrorKind::ForkFailed => "fork failed",
            ErrorKind::ExecFailed => "exec failed",
            ErrorKind::NotRunning => "not running",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Stream already running with PID {pid}, stop it first")]
    AlreadyRunning { pid: u32 },

    #[error("{0}")]
    InvalidParams(String),

    #[error("Failed to fork streaming process: {0}")]
    ForkFailed(#[source] io::Error),

    #[error("Failed to execute {method} streaming: {source}")]
    ExecFailed {
        method: &'static str,
        #[source]
        source: io::Error,
    },
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::AlreadyRunning { .. } => ErrorKind::AlreadyRunning,
            SourceError::InvalidParams(_) => ErrorKind::InvalidParams,
            SourceError::ForkFailed(_) => ErrorKind::ForkFailed,
            SourceError::ExecFailed { .. } => ErrorKind::ExecFailed,
        }
    }

    /// Classifies a spawn failure. A missing or non-executable binary is an
    /// exec failure; anything else happened before the exec.
    pub fn from_spawn(method: &'static str, err: io::Error) -> Self {
        let exec = matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ) || err.raw_os_error() == Some(libc::ENOEXEC);

        if exec {
            SourceError::ExecFailed { method, source: err }
        } else {
            SourceError::ForkFailed(err)
        }
    }
}

/// Error state recorded by the supervisor, overwritten on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

impl LastError {
    pub fn clear(&mut self) {
        self.kind = ErrorKind::None;
        self.message.clear();
    }

    pub fn set(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.kind = kind;
        self.message = message.into();
    }

    pub fn record(&mut self, err: &SourceError) {
        self.set(err.kind(), err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_control_interface() {
        assert_eq!(ErrorKind::None.code(), 0);
        assert_eq!(ErrorKind::AlreadyRunning.code(), -1);
        assert_eq!(ErrorKind::InvalidParams.code(), -2);
        assert_eq!(ErrorKind::ForkFailed.code(), -3);
        assert_eq!(ErrorKind::ExecFailed.code(), -4);
        assert_eq!(ErrorKind::NotRunning.code(), -5);
    }

    #[test]
    fn missing_binary_is_exec_failure() {
        let err = SourceError::from_spawn("VLC", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.kind(), ErrorKind::ExecFailed);
        assert!(err.to_string().starts_with("Failed to execute VLC streaming"));
    }

    #[test]
    fn resource_exhaustion_is_fork_failure() {
        let err = SourceError::from_spawn("FFmpeg", io::Error::from_raw_os_error(libc::EAGAIN));
        assert_eq!(err.kind(), ErrorKind::ForkFailed);
    }

    #[test]
    fn already_running_names_the_pid() {
        let err = SourceError::AlreadyRunning { pid: 4242 };
        assert_eq!(
            err.to_string(),
            "Stream already running with PID 4242, stop it first"
        );
    }

    #[test]
    fn last_error_is_overwritten_not_accumulated() {
        let mut last = LastError::default();
        last.record(&SourceError::InvalidParams("No target IP provided".into()));
        last.clear();
        assert_eq!(last, LastError::default());
        last.set(ErrorKind::NotRunning, "No stream is running");
        assert_eq!(last.kind, ErrorKind::NotRunning);
        assert_eq!(last.message, "No stream is running");
    }
}
