use std::fmt;

use crate::method::Backend;

pub const DEFAULT_PORT: u32 = 8554;
/// Highest port a UDP/RTP destination can use.
pub const MAX_PORT: u32 = u16::MAX as u32;
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_BITRATE: u32 = 8192;

/// Display grabbed by the FFmpeg backend.
const X11_DISPLAY: &str = ":0.0";

/// Stream parameters as supplied by the caller. Zero means "use the default"
/// for port, fps and bitrate, and "let the backend decide" for the
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub port: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub audio: bool,
}

impl Default for StreamRequest {
    fn default() -> Self {
        StreamRequest {
            port: 0,
            width: 0,
            height: 0,
            fps: 0,
            bitrate: 0,
            audio: true,
        }
    }
}

impl StreamRequest {
    pub fn effective(&self) -> StreamParams {
        StreamParams {
            port: non_zero_or(self.port, DEFAULT_PORT),
            width: self.width,
            height: self.height,
            fps: non_zero_or(self.fps, DEFAULT_FPS),
            bitrate: non_zero_or(self.bitrate, DEFAULT_BITRATE),
            audio: self.audio,
        }
    }
}

fn non_zero_or<T: PartialEq + Default>(value: T, default: T) -> T {
    if value == T::default() {
        default
    } else {
        value
    }
}

/// Effective parameters, after defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub port: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
    pub audio: bool,
}

impl Default for StreamParams {
    fn default() -> Self {
        StreamRequest::default().effective()
    }
}

impl StreamParams {
    /// Explicit output size, or `None` when the backend picks one.
    pub fn resolution(&self) -> Option<Resolution> {
        if self.width != 0 && self.height != 0 {
            Some(Resolution {
                width: self.width,
                height: self.height,
            })
        } else {
            None
        }
    }

    pub fn resolution_label(&self) -> String {
        match self.resolution() {
            Some(res) => res.to_string(),
            None => "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A fully resolved command line for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCommand {
    pub backend: Backend,
    pub program: String,
    pub args: Vec<String>,
}

impl StreamCommand {
    pub fn new(backend: Backend, target: &str, params: &StreamParams) -> Self {
        let args = match backend {
            Backend::GStreamer => gstreamer_args(target, params),
            Backend::Vlc => vlc_args(target, params),
            Backend::FFmpeg => ffmpeg_args(target, params),
        };
        StreamCommand {
            backend,
            program: backend.program().to_string(),
            args,
        }
    }
}

impl fmt::Display for StreamCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

pub fn gstreamer_args(target: &str, params: &StreamParams) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    args.push("ximagesrc".into());
    args.push("!".into());
    args.push(format!("video/x-raw,framerate={}/1", params.fps));
    args.push("!".into());
    args.push("videoconvert".into());

    if let Some(res) = params.resolution() {
        args.push("!".into());
        args.push("videoscale".into());
        args.push("!".into());
        args.push(format!(
            "video/x-raw,width={},height={}",
            res.width, res.height
        ));
        args.push("!".into());
        args.push("videoconvert".into());
    }

    args.push("!".into());
    args.push("x264enc".into());
    args.push("tune=zerolatency".into());
    args.push(format!("bitrate={}", params.bitrate));
    args.push("!".into());
    args.push("rtph264pay".into());
    args.push("!".into());
    args.push("udpsink".into());
    args.push(format!("host={}", target));
    args.push(format!("port={}", params.port));
    args.push("auto-multicast=true".into());

    args
}

pub fn vlc_args(target: &str, params: &StreamParams) -> Vec<String> {
    let mut transcode = format!("vcodec=h264,vb={}", params.bitrate);
    if let Some(res) = params.resolution() {
        transcode.push_str(&format!(",width={},height={}", res.width, res.height));
    }
    transcode.push_str(&format!(
        ",fps={},acodec={}",
        params.fps,
        if params.audio { "mp3" } else { "none" }
    ));

    let sout = format!(
        "#transcode{{{}}}:rtp{{dst={},port={},mux=ts}}",
        transcode, target, params.port
    );

    vec![
        "screen://".into(),
        format!(":screen-fps={}", params.fps),
        ":screen-caching=100".into(),
        "--sout".into(),
        sout,
    ]
}

pub fn ffmpeg_args(target: &str, params: &StreamParams) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-f".into(),
        "x11grab".into(),
        "-r".into(),
        params.fps.to_string(),
        "-i".into(),
        X11_DISPLAY.into(),
    ];

    if let Some(res) = params.resolution() {
        args.push("-vf".into());
        args.push(format!("scale={}:{}", res.width, res.height));
    }

    args.extend(
        [
            "-vcodec",
            "libx264",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-b:v",
        ]
        .map(String::from),
    );
    args.push(format!("{}k", params.bitrate));
    args.push("-f".into());
    args.push("rtp".into());
    args.push(format!("rtp://{}:{}", target, params.port));

    args
}
