use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};
use tokio::net::TcpListener;
use walletconnect_relay::api::{self, AppState};
use walletconnect_relay::config::Config;
use walletconnect_relay::manager::SessionManager;
use walletconnect_relay::relay::RelayServer;

#[derive(Debug, Parser)]
#[command(name = "wc-relay", version, about = "WalletConnect style relay server")]
struct Args {
    /// trace, debug, info, warn or error. Falls back to RUST_LOG.
    #[arg(long)]
    log_level: Option<LevelFilter>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let config = Config::from_env().context("failed to read configuration")?;
    config.validate().context("invalid configuration")?;

    let relay = RelayServer::spawn(config.relay.clone());
    let manager = SessionManager::new(config.manager.clone());
    manager.spawn_cleanup_task();

    let app = api::router(AppState {
        relay,
        manager: manager.clone(),
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(
        "listening on {}, relay advertised at {}",
        config.bind_addr, config.manager.relay_url
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    info!("shut down");
    Ok(())
}

fn init_logging(level: Option<LevelFilter>) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    );
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {e}");
    }
}
