use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chain::NodeConfig;
use clap::Parser;
use containers::Block;
use metrics::Metrics;
use metrics::server::{MetricsServerConfig, StatusProvider, run_metrics_server};
use networking::{
    Ledger, LocalNode, MemoryLedger, MessageHandler, NodeActor, NodeContext, PeerInfo,
    SyncCoordinator, TcpDialer, Transport,
};
use tokio::task;
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Args {
    /// YAML node configuration. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "0.0.0.0")]
    address: IpAddr,

    /// Overrides NODE_PORT from the config file.
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    metrics_port: Option<u16>,

    #[arg(long)]
    disable_metrics: bool,

    /// Seed peers, in addition to SEED_LIST.
    #[arg(short, long = "seed")]
    seeds: Vec<SocketAddr>,
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(port) = args.port {
        config.node_port = port;
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }
    if args.disable_metrics {
        config.metrics_enabled = false;
    }
    Ok(config)
}

fn seed_addresses(config: &NodeConfig, extra: &[SocketAddr]) -> Vec<SocketAddr> {
    let mut seeds = extra.to_vec();
    for entry in &config.seed_list {
        match entry.parse::<SocketAddr>() {
            Ok(addr) if !seeds.contains(&addr) => seeds.push(addr),
            Ok(_) => {}
            Err(err) => warn!(seed = %entry, %err, "ignoring malformed seed address"),
        }
    }
    seeds
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let seeds = seed_addresses(&config, &args.seeds);
    let listen_addr = SocketAddr::new(args.address, config.node_port);

    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new(Block::genesis()));
    let metrics = Arc::new(Metrics::new());
    let local = LocalNode::generate(&config, ledger.clone());
    info!(
        id = format_args!("{:#x}", local.id()),
        public_key = %hex::encode(local.public_key().to_sec1_bytes()),
        node_type = ?config.node_type,
        "local node"
    );

    let ctx = Arc::new(NodeContext::new(local, config, ledger, metrics.clone())?);
    info!(
        checkpoints = ctx.checkpoints.all().len(),
        window = ctx.window.capacity(),
        seeds = seeds.len(),
        "node configured"
    );

    let (actor, node) = NodeActor::new(ctx.clone());
    let sync = SyncCoordinator::new(ctx.clone());
    let handler = MessageHandler::new(ctx.clone(), node, sync.clone());
    let transport = Transport::new(ctx.clone(), handler, TcpDialer);

    let actor_handle = task::spawn(actor.run());
    let listener_handle = task::spawn(transport.clone().listen(listen_addr));
    let dialer_handle = task::spawn(transport.maintain_outbound(seeds));
    let sync_handle = task::spawn(sync.run());

    let metrics_handle = task::spawn({
        let ctx = ctx.clone();
        async move {
            if !ctx.config.metrics_enabled {
                return std::future::pending::<Result<()>>().await;
            }
            let address = ctx
                .config
                .metrics_address
                .parse::<IpAddr>()
                .context("invalid METRICS_ADDRESS")?;
            let config = MetricsServerConfig {
                metrics_address: address,
                metrics_port: ctx.config.metrics_port,
            };
            let status: Arc<dyn StatusProvider> = ctx;
            run_metrics_server(config, metrics, status).await
        }
    });

    tokio::select! {
        _ = actor_handle => {
            warn!("node actor stopped");
        }
        result = listener_handle => {
            result.context("listener task panicked")?.context("listener failed")?;
        }
        _ = dialer_handle => {
            warn!("dialer stopped");
        }
        _ = sync_handle => {
            warn!("sync driver stopped");
        }
        result = metrics_handle => {
            result.context("metrics task panicked")?.context("metrics server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    info!("node exiting");
    Ok(())
}
