use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use crate::config::HotswapConfig;
use crate::engine::Engine;
use crate::engine::docker::DockerEngine;
use crate::image::EngineImageResolver;
use crate::image::credentials::{CredentialsProvider, DockerConfigCredentials};
use crate::replace::Replacer;
use crate::server::AppState;
use crate::server::metrics::Metrics;

mod cli;
mod config;
mod engine;
mod image;
mod replace;
mod server;
mod signals;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenv::dotenv();

    let args = cli::Args::parse();

    // Initialize the logger
    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .init();

    match run(args).await {
        Ok(()) => {
            log::info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: cli::Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = HotswapConfig::from_args(&args)?;

    let docker = DockerEngine::connect().map_err(|e| format!("can't create docker client: {e}"))?;
    if let Err(e) = docker.ping().await {
        log::warn!("Docker daemon is not reachable yet: {e}");
    }
    let engine: Arc<dyn Engine> = Arc::new(docker);

    let credentials: Option<Arc<dyn CredentialsProvider>> = match DockerConfigCredentials::from_env()
    {
        Ok(provider) => {
            log::debug!("Reading registry credentials from {:?}", provider.config_dir());
            Some(Arc::new(provider))
        }
        Err(e) => {
            log::warn!("Registry credentials disabled: {e}");
            None
        }
    };

    let resolver = Arc::new(EngineImageResolver::new(Arc::clone(&engine), credentials));
    let replacer = Replacer::new(engine, resolver);
    let metrics = Arc::new(Metrics::new().map_err(|e| format!("metrics registry: {e}"))?);
    let state = AppState::new(&config, replacer, metrics);

    let shutdown = signals::handle_shutdown()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Could not listen on {addr}: {e}"))?;

    log::info!("Server is ready to handle requests at {addr}");
    signals::notify_ready();

    server::serve(listener, state, shutdown).await?;
    Ok(())
}
