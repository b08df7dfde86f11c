//! `por-server`: serves audit, read, and update requests against one data
//! file. Loads the server and Merkle configs, binds a TCP listener, and
//! hands connections to the accept loop.

use clap::Parser;
use por::config::ServerConfig;
use por::merkle::config::StoreInfo;
use por::session::{self, Session};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Serve proof-of-retrievability audit/read/update requests", long_about = None)]
struct Args {
    /// Server config produced by `por-init` (n, m, data file path).
    server_config: PathBuf,
    /// Merkle fingerprint produced by `por-init`.
    merkle_config: PathBuf,
    /// Merkle tree file produced by `por-init`.
    merkle_tree: PathBuf,

    /// TCP port to listen on.
    #[clap(short, long, default_value_t = 9000u16)]
    port: u16,

    /// Use the mmap-backed row source instead of pread for the audit's
    /// matrix-vector product.
    #[clap(long)]
    mmap: bool,

    /// Verbose logging.
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut server_file = tokio::fs::File::open(&args.server_config).await?;
    let server_cfg = ServerConfig::read(&mut server_file).await?;

    let mut merkle_file = tokio::fs::File::open(&args.merkle_config).await?;
    let info = StoreInfo::read(&mut merkle_file, true).await?;

    let session = Session {
        server_cfg,
        info,
        tree_path: args.merkle_tree,
        merkle_config_path: args.merkle_config,
        num_workers: num_cpus::get(),
        use_mmap: args.mmap,
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(%addr, "starting por-server");
    session::run(addr, session).await?;
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
