use dotenv::dotenv;
use log::{info, warn};
use server_inner::ServerInner;
use tokio::signal::unix::{signal, SignalKind};
use tonic::transport::Server;
use wfd_source::config::Config;
use wfd_source::StreamSource;

pub mod service {
    tonic::include_proto!("source");
}

mod server_inner;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;
    let source = StreamSource::new(config.method);
    let server = ServerInner::new(source.clone());

    info!(
        "listening on {} (streaming method: {})",
        config.listen, config.method
    );

    Server::builder()
        .add_service(service::stream_source_server::StreamSourceServer::new(server))
        .serve_with_shutdown(config.listen, shutdown_signal())
        .await?;

    if source.is_active().await {
        source.stop().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
    info!("shutting down");
}
