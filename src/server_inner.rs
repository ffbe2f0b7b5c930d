use std::pin::Pin;

use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};
use wfd_source::{
    Backend, ErrorKind, Launcher, MethodPreference, ProcessLauncher, StreamRequest, StreamSource,
    StreamStatus,
};

use crate::service::status_event::State;
use crate::service::stream_source_server;
use crate::service::{
    GetStatusRequest, GetStatusResponse, Method, SetMethodRequest, SetMethodResponse,
    StartStreamRequest, StartStreamResponse, StatusEvent, StopStreamRequest, StopStreamResponse,
    WatchStatusRequest,
};

pub struct ServerInner<L: Launcher = ProcessLauncher> {
    source: StreamSource<L>,
}

impl<L: Launcher> ServerInner<L> {
    pub fn new(source: StreamSource<L>) -> Self {
        ServerInner { source }
    }
}

fn method_to_proto(preference: MethodPreference) -> Method {
    match preference {
        MethodPreference::Auto => Method::Auto,
        MethodPreference::Pinned(Backend::GStreamer) => Method::Gstreamer,
        MethodPreference::Pinned(Backend::Vlc) => Method::Vlc,
        MethodPreference::Pinned(Backend::FFmpeg) => Method::Ffmpeg,
    }
}

fn method_from_proto(method: Method) -> MethodPreference {
    match method {
        Method::Auto => MethodPreference::Auto,
        Method::Gstreamer => Backend::GStreamer.into(),
        Method::Vlc => Backend::Vlc.into(),
        Method::Ffmpeg => Backend::FFmpeg.into(),
    }
}

fn status_event(status: &StreamStatus) -> StatusEvent {
    match status {
        StreamStatus::Idle => StatusEvent {
            state: State::Idle.into(),
            ..StatusEvent::default()
        },
        StreamStatus::Streaming {
            pid,
            backend,
            target,
        } => StatusEvent {
            state: State::Streaming.into(),
            pid: *pid,
            target_ip: target.clone(),
            backend: method_to_proto((*backend).into()).into(),
            ..StatusEvent::default()
        },
        StreamStatus::Stopped { pid } => StatusEvent {
            state: State::Stopped.into(),
            pid: *pid,
            ..StatusEvent::default()
        },
        StreamStatus::Exited { pid, code } => StatusEvent {
            state: State::Exited.into(),
            pid: *pid,
            exit_code: *code,
            ..StatusEvent::default()
        },
    }
}

#[tonic::async_trait]
impl<L: Launcher> stream_source_server::StreamSource for ServerInner<L> {
    type WatchStatusStream = Pin<Box<dyn Stream<Item = Result<StatusEvent, Status>> + Send>>;

    async fn start_stream(
        &self,
        request: Request<StartStreamRequest>,
    ) -> Result<Response<StartStreamResponse>, Status> {
        let req = request.into_inner();
        let stream_request = StreamRequest {
            port: req.port,
            width: req.width,
            height: req.height,
            fps: req.fps,
            bitrate: req.bitrate,
            audio: req.audio,
        };

        let response = match self
            .source
            .start(Some(req.target_ip.as_str()), stream_request)
            .await
        {
            Ok(pid) => StartStreamResponse {
                error_code: ErrorKind::None.code(),
                error_message: String::new(),
                pid,
            },
            Err(e) => StartStreamResponse {
                error_code: e.kind().code(),
                error_message: e.to_string(),
                pid: 0,
            },
        };

        Ok(Response::new(response))
    }

    async fn stop_stream(
        &self,
        _request: Request<StopStreamRequest>,
    ) -> Result<Response<StopStreamResponse>, Status> {
        let outcome = self.source.stop().await;
        let error_message = match outcome.kind() {
            ErrorKind::None => String::new(),
            _ => outcome.to_string(),
        };

        Ok(Response::new(StopStreamResponse {
            error_code: outcome.kind().code(),
            error_message,
        }))
    }

    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> Result<Response<GetStatusResponse>, Status> {
        let snapshot = self.source.snapshot().await;

        Ok(Response::new(GetStatusResponse {
            active: snapshot.is_active(),
            pid: snapshot.pid.unwrap_or_default(),
            target_ip: snapshot.target_address.unwrap_or_default(),
            method: method_to_proto(snapshot.preference).into(),
            port: snapshot.params.port,
            width: snapshot.params.width,
            height: snapshot.params.height,
            fps: snapshot.params.fps,
            bitrate: snapshot.params.bitrate,
            audio: snapshot.params.audio,
            error_code: snapshot.last_error.kind.code(),
            error_message: snapshot.last_error.message,
            backend: snapshot
                .backend
                .map_or(Method::Auto, |backend| method_to_proto(backend.into()))
                .into(),
        }))
    }

    async fn set_method(
        &self,
        request: Request<SetMethodRequest>,
    ) -> Result<Response<SetMethodResponse>, Status> {
        let value = request.into_inner().method;
        let method = Method::try_from(value)
            .map_err(|_| Status::invalid_argument(format!("unknown streaming method {}", value)))?;

        self.source
            .set_method_preference(method_from_proto(method))
            .await;

        Ok(Response::new(SetMethodResponse {}))
    }

    async fn watch_status(
        &self,
        _request: Request<WatchStatusRequest>,
    ) -> Result<Response<Self::WatchStatusStream>, Status> {
        let stream = WatchStream::new(self.source.subscribe())
            .map(|status| Ok(status_event(&status)));

        Ok(Response::new(Box::pin(stream)))
    }
}
