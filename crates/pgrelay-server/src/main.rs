use clap::Parser;
use pgrelay_client::ClientRegistry;
use pgrelay_server::{metrics, Config, ProxyServer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(
    name = "pgrelay-server",
    version,
    about = "Forwards framed JSON queries to pooled database connections"
)]
struct Args {
    /// TOML config file; every setting has a default.
    #[arg(long)]
    config: Option<String>,
    /// Port to listen on, keeping the configured host.
    #[arg(short, long)]
    port: Option<u16>,
    /// Backend for requests that carry no address, e.g. postgres://user@host/db.
    #[arg(short, long)]
    address: Option<String>,
    #[arg(short, long)]
    debug: bool,
    #[arg(short, long, alias = "silent", conflicts_with = "debug")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.debug {
        Level::DEBUG
    } else if args.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.set_port(port);
    }
    if let Some(address) = args.address {
        config.server.default_address = Some(address);
    }
    config.validate()?;

    if let Some(addr) = &config.metrics.listen_addr {
        metrics::start_exporter(addr).await?;
    }

    let registry = ClientRegistry::new(config.client_settings());
    let handle = ProxyServer::start(config.server_settings(), registry.clone()).await?;
    info!(
        addr = %handle.local_addr(),
        default_address = config.server.default_address.as_deref().unwrap_or("-"),
        "ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.close().await;
    registry.end().await;
    Ok(())
}
