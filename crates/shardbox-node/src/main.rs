//! shardbox-node - keeps encrypted shares for recovery
//!
//! usage:
//!   shardbox-node --port 4300
//!   shardbox-node --port 4300 --data-dir /var/lib/shardbox --metrics-port 9300
//!
//! data stored in ~/.shardbox-node/ (sled db + node.key)

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use shardbox_node::{load_or_create_key, router, AppState, NodeError};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// shardbox-node - keeps encrypted shares for recovery
#[derive(Parser)]
#[command(name = "shardbox-node")]
#[command(about = "shardbox storage node - keeps encrypted shares for recovery")]
#[command(version)]
struct Args {
    /// port to listen on
    #[arg(short, long, default_value = "4300")]
    port: u16,

    /// bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// data directory (default: ~/.shardbox-node)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// metrics port (prometheus endpoint, default: api_port + 1000)
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn socket_addr(bind: &str, port: u16) -> Result<SocketAddr, NodeError> {
    format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| NodeError::InvalidAddress(format!("{}:{}: {}", bind, port, e)))
}

async fn shutdown_signal() {
    // without a signal handler the server just runs until killed
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardbox_node=info")),
        )
        .init();

    let args = Args::parse();

    let metrics_port = args
        .metrics_port
        .unwrap_or_else(|| args.port.saturating_add(1000));
    let metrics_addr = socket_addr(&args.bind, metrics_port)?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| NodeError::Metrics(e.to_string()))?;

    let data_dir = args.data_dir.unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        format!("{}/.shardbox-node", home)
    });
    std::fs::create_dir_all(&data_dir)?;

    let db = sled::open(format!("{}/db", data_dir))?;
    let key_pair = load_or_create_key(std::path::Path::new(&format!("{}/node.key", data_dir)))?;

    info!("shardbox-node v{}", env!("CARGO_PKG_VERSION"));
    info!("  pubkey: {}", hex::encode(&key_pair.public_key));
    info!("  shares: {}", db.len());
    info!("  data: {}", data_dir);
    info!("  bind: {}:{}", args.bind, args.port);
    info!("  metrics: {}", metrics_addr);

    let db_handle = db.clone();
    let state = Arc::new(AppState::new(db, key_pair));
    let app = router(state);

    let addr = socket_addr(&args.bind, args.port)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db_handle.flush_async().await?;
    info!("shut down");
    Ok(())
}
