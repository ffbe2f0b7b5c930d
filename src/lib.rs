//! Launches and supervises a single external screen-streaming process
//! (GStreamer, VLC or FFmpeg) pushing RTP to a Wifi-Display sink.

pub mod args;
pub mod config;
pub mod error;
pub mod launcher;
pub mod method;
pub mod session;
pub mod source;

pub use args::{StreamCommand, StreamParams, StreamRequest};
pub use error::{ErrorKind, SourceError};
pub use launcher::{Launcher, ProcessLauncher};
pub use method::{Backend, MethodPreference};
pub use session::StreamStatus;
pub use source::{SessionSnapshot, StopOutcome, StreamSource};
