use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parlor_server::ChatServer;
use parlor_shared::config::load_server_config;

#[derive(Parser, Debug)]
#[command(name = "parlor-server", about = "Parlor chat server")]
struct Args {
    /// Path to the server config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn resolve_config_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.config {
        return path.clone();
    }
    let candidates = [
        PathBuf::from("config/server.json"),
        PathBuf::from("../config/server.json"),
    ];
    candidates
        .iter()
        .find(|path| path.exists())
        .cloned()
        .unwrap_or_else(|| candidates[0].clone())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = resolve_config_path(&args);
    let config = load_server_config(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    info!(
        config = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "starting parlor server"
    );
    info!(db_path = %config.db_path.display(), data_dir = %config.data_dir.display(), "storage");

    let bind_host = config.bind_host.clone();
    let port = config.port;
    let server = ChatServer::new(config)?;

    let listener = TcpListener::bind((bind_host.as_str(), port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    tokio::select! {
        _ = server.run(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
