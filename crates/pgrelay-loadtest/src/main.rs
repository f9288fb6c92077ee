use anyhow::Context;
use clap::Parser;
use pgrelay_client::{ClientRegistry, ClientSettings};
use pgrelay_loadtest::{LoadGenerator, LoadTest, DEFAULT_QUERY};
use pgrelay_pool::PoolConfig;
use serde_json::Value;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(
    name = "pgrelay-loadtest",
    version,
    about = "Runs concurrent queries against a proxy or database"
)]
struct Args {
    /// Target, e.g. remote://localhost:5433 or postgres://user@host/db.
    address: String,
    /// Number of simultaneous workers.
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,
    /// Total number of successful queries; must divide evenly by concurrency.
    #[arg(short = 'n', long, default_value_t = 1000)]
    number: u64,
    #[arg(short, long, default_value = DEFAULT_QUERY)]
    query: String,
    /// Query parameter as JSON, repeatable.
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,
    /// Backend address a remote proxy should use instead of its default.
    #[arg(long)]
    route: Option<String>,
    /// Pooled connections to open; defaults to the concurrency.
    #[arg(long)]
    pool_size: Option<usize>,
    /// Errors a worker tolerates before the run is abandoned.
    #[arg(long)]
    max_errors: Option<u64>,
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.debug { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let params = args
        .params
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
        .collect();
    let test = LoadTest {
        address: args.address.clone(),
        query: args.query,
        params,
        total: args.number,
        concurrency: args.concurrency,
        max_errors: args.max_errors,
    };
    let generator = LoadGenerator::new(test)?;
    let settings = ClientSettings {
        pool: PoolConfig {
            max_size: args.pool_size.unwrap_or(args.concurrency),
            ..PoolConfig::default()
        },
        route: args.route,
        ..ClientSettings::default()
    };
    let registry = ClientRegistry::new(settings);
    let report = generator
        .run(&registry)
        .await
        .with_context(|| format!("could not load test {}", args.address))?;
    registry.end().await;
    println!("Load test to {}: {report}", args.address);
    Ok(())
}
