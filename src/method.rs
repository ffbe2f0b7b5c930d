use std::ffi::OsString;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which streaming toolchain the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodPreference {
    #[default]
    Auto,
    Pinned(Backend),
}

/// A concrete external media pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    GStreamer,
    Vlc,
    FFmpeg,
}

impl Backend {
    pub fn program(self) -> &'static str {
        match self {
            Backend::GStreamer => "gst-launch-1.0",
            Backend::Vlc => "cvlc",
            Backend::FFmpeg => "ffmpeg",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::GStreamer => "GStreamer",
            Backend::Vlc => "VLC",
            Backend::FFmpeg => "FFmpeg",
        }
    }

    /// Binaries whose presence means the backend is usable.
    fn probe_names(self) -> &'static [&'static str] {
        match self {
            Backend::GStreamer => &["gst-launch-1.0"],
            Backend::Vlc => &["cvlc", "vlc"],
            Backend::FFmpeg => &["ffmpeg"],
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl MethodPreference {
    pub fn name(self) -> &'static str {
        match self {
            MethodPreference::Auto => "auto-detect",
            MethodPreference::Pinned(backend) => backend.name(),
        }
    }
}

impl fmt::Display for MethodPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Backend> for MethodPreference {
    fn from(backend: Backend) -> Self {
        MethodPreference::Pinned(backend)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown streaming method {0:?} (expected auto, gstreamer, vlc or ffmpeg)")]
pub struct UnknownMethod(pub String);

impl FromStr for MethodPreference {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(MethodPreference::Auto),
            "gstreamer" | "gst" => Ok(Backend::GStreamer.into()),
            "vlc" => Ok(Backend::Vlc.into()),
            "ffmpeg" => Ok(Backend::FFmpeg.into()),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// Answers whether an external program can be executed on this host.
pub trait ToolProbe: Send + Sync {
    fn is_available(&self, program: &str) -> bool;
}

/// Looks programs up on a search path without going through a shell.
#[derive(Debug, Clone)]
pub struct PathProbe {
    dirs: Vec<PathBuf>,
}

impl PathProbe {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        PathProbe { dirs }
    }

    pub fn from_env() -> Self {
        let path = std::env::var_os("PATH").unwrap_or_else(OsString::new);
        PathProbe::new(std::env::split_paths(&path).collect())
    }
}

impl ToolProbe for PathProbe {
    fn is_available(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(Path::new(program));
        }
        self.dirs
            .iter()
            .filter(|dir| !dir.as_os_str().is_empty())
            .any(|dir| is_executable(&dir.join(program)))
    }
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

const PROBE_ORDER: [Backend; 3] = [Backend::GStreamer, Backend::Vlc, Backend::FFmpeg];

/// Resolves a preference to a backend. An explicit choice is returned as is,
/// even if the tool is missing; the failure then surfaces when launching.
pub fn select_backend(preference: MethodPreference, probe: &dyn ToolProbe) -> Backend {
    match preference {
        MethodPreference::Pinned(backend) => backend,
        MethodPreference::Auto => PROBE_ORDER
            .into_iter()
            .find(|backend| {
                backend
                    .probe_names()
                    .iter()
                    .any(|name| probe.is_available(name))
            })
            .unwrap_or(Backend::GStreamer),
    }
}
