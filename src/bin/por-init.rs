//! `por-init`: conditions a raw data file into the client/server audit
//! configs and the Merkle tree file. Parses args, runs setup, builds the
//! Merkle tree over the same file, and persists all four artifacts.

use clap::Parser;
use por::audit::setup;
use por::hash::HashAlg;
use por::merkle::build_tree;
use por::merkle::config::StoreInfo;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;

/// Default seed used when `--seed` is not given.
const DEFAULT_SEED: u64 = 2020;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Set up a file for proof-of-retrievability audits", long_about = None)]
struct Args {
    /// Raw data file the server will hold.
    data: PathBuf,
    /// Output path for the client's persistent config (u, t, n, m).
    client_config: PathBuf,
    /// Output path for the server's persistent config (n, m, data path).
    server_config: PathBuf,
    /// Output path for the Merkle fingerprint (block_size, hash_alg, size, root).
    merkle_config: PathBuf,
    /// Output path for the Merkle tree file (metadata block + hashes).
    merkle_tree: PathBuf,

    /// Seed for the secret vector `u`. Fixed by default so repeated runs
    /// over the same file are reproducible, matching the legacy default.
    #[clap(short, long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Merkle block size in bytes.
    #[clap(short, long, default_value_t = por::merkle::config::DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Use the mmap-backed row source instead of pread for the setup
    /// matrix-vector reduction.
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

    let data_path = args.data.clone();
    let seed = args.seed;
    let use_mmap = args.mmap;
    let (client_cfg, server_cfg) =
        tokio::task::spawn_blocking(move || setup::run_setup(&data_path, seed, use_mmap)).await??;
    tracing::info!(n = client_cfg.n, m = client_cfg.m, "setup complete");

    let mut buf = Vec::new();
    client_cfg.write(&mut buf).await?;
    tokio::fs::write(&args.client_config, &buf).await?;

    let mut buf = Vec::new();
    server_cfg.write(&mut buf).await?;
    tokio::fs::write(&args.server_config, &buf).await?;

    let data_path = args.data.clone();
    let tree_path = args.merkle_tree.clone();
    let block_size = args.block_size;
    let info = tokio::task::spawn_blocking(move || build_tree_file(&data_path, &tree_path, block_size))
        .await??;

    let mut merkle_file = tokio::fs::File::create(&args.merkle_config).await?;
    info.write(&mut merkle_file, true).await?;

    let nblocks = info.nblocks();
    tracing::info!(nblocks, block_size = args.block_size, "merkle tree built");
    println!(
        "setup complete: n={} m={} nblocks={}",
        client_cfg.n, client_cfg.m, nblocks
    );
    Ok(())
}

/// Streams `data_path` in `block_size` chunks, writes the metadata block
/// plus every emitted hash to `tree_path`, and returns the filled-in
/// [`StoreInfo`] fingerprint (root + signature).
fn build_tree_file(data_path: &std::path::Path, tree_path: &std::path::Path, block_size: u32) -> por::PorResult<StoreInfo> {
    let data_len = std::fs::metadata(data_path)?.len();
    let mut info = StoreInfo::new(block_size, HashAlg::DEFAULT, data_len);
    let nblocks = info.nblocks();

    let mut tree_file = File::create(tree_path)?;
    tree_file.write_all(&info.metadata_block())?;

    let mut reader = BufReader::new(File::open(data_path)?);
    let bs = block_size as usize;
    let blocks = (0..nblocks).map(|i| {
        let len = if i + 1 == nblocks && data_len % block_size as u64 != 0 {
            (data_len % block_size as u64) as usize
        } else {
            bs
        };
        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .expect("data file shrank during tree build");
        buf
    });

    let root = build_tree(info.hash_alg, nblocks, blocks, |h| {
        tree_file.write_all(h).expect("tree file write failed");
    });
    info.root = root;
    info.update_signature();
    Ok(info)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
