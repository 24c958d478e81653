use std::sync::Arc;

use anyhow::Result;
use chatline_server::{AppState, GeneratorKind, ServerConfig, init_observability, serve};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "chatline-server")]
#[command(about = "Streams chat replies in the chatline data stream format")]
#[command(version)]
struct Args {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Generator answering requests (overrides CHATLINE_GENERATOR)
    #[arg(short, long, value_enum)]
    generator: Option<GeneratorKind>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    chatline_server::config::load_dotenv();
    init_observability(if args.debug { "debug" } else { "info" });

    let mut config = ServerConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(generator) = args.generator {
        config.generator = generator;
    }

    let state = Arc::new(AppState::from_config(config));
    serve(state, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
