use clap::Parser;
use computechain::config::NodeConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cpc-node", about = "ComputeChain node")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "./config.toml")]
    config: String,

    /// Override [node].data_dir.
    #[arg(long)]
    data_dir: Option<String>,

    /// Override [network].listen.
    #[arg(long)]
    listen: Option<String>,

    /// Override [rpc].listen.
    #[arg(long)]
    rpc: Option<String>,

    /// Add a seed peer (host:port); repeatable.
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Disable block production even when our key is in the active set.
    #[arg(long)]
    no_propose: bool,

    /// Write an example config to the --config path and exit.
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.init_config {
        if let Err(e) = NodeConfig::write_example(&args.config) {
            eprintln!("failed to write {}: {e}", args.config);
            std::process::exit(1);
        }
        println!("wrote example config to {}", args.config);
        return;
    }

    let mut cfg = match NodeConfig::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            std::process::exit(2);
        }
    };
    if let Some(dir) = args.data_dir {
        cfg.node.data_dir = dir;
    }
    if let Some(listen) = args.listen {
        cfg.network.listen = listen;
    }
    if let Some(rpc) = args.rpc {
        cfg.rpc.listen = rpc;
    }
    for peer in args.peers {
        if !cfg.network.peers.contains(&peer) {
            cfg.network.peers.push(peer);
        }
    }
    if args.no_propose {
        cfg.node.propose = false;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.node.log_level.clone())),
        )
        .init();

    if let Err(e) = computechain::node::run(cfg).await {
        tracing::error!("node exited with error: {e:#}");
        std::process::exit(1);
    }
}
