//! `por-client`: issues audit, read, and update requests against a
//! `por-server`, as `audit`/`read`/`update` subcommands rather than
//! interactive menu options.

use clap::{Parser, Subcommand};
use por::audit::protocol::run_audit_client;
use por::audit::read::run_read_client;
use por::config::ClientConfig;
use por::merkle::config::StoreInfo;
use por::update::run_update_client;
use std::path::PathBuf;
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Audit, read, or update a remotely held file", long_about = None)]
struct Args {
    /// Client config produced by `por-init` (n, m, u, t).
    client_config: PathBuf,
    /// Merkle fingerprint produced by `por-init`.
    merkle_config: PathBuf,

    /// Server IP or hostname.
    #[clap(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server port.
    #[clap(short, long, default_value_t = 9000u16)]
    port: u16,

    /// Verbose logging.
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue one linear-algebra audit round and report pass/fail.
    Audit,
    /// Verified range read: fetch `count` bytes at `offset` and print them.
    Read {
        offset: u64,
        count: u64,
        /// Write the verified bytes here instead of stdout.
        #[clap(short, long)]
        out: Option<PathBuf>,
    },
    /// Overwrite `[initial, final]` (inclusive) with bytes read from `data`.
    Update {
        initial: u64,
        #[clap(name = "final")]
        final_: u64,
        /// File supplying exactly `final - initial + 1` replacement bytes.
        data: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut client_file = tokio::fs::File::open(&args.client_config).await?;
    let mut client_cfg = ClientConfig::read(&mut client_file).await?;

    let mut merkle_file = tokio::fs::File::open(&args.merkle_config).await?;
    let info = StoreInfo::read(&mut merkle_file, true).await?;

    let mut stream = TcpStream::connect((args.server.as_str(), args.port)).await?;

    match args.command {
        Command::Audit => {
            let outcome = run_audit_client(&mut stream, client_cfg.n, client_cfg.m, &client_cfg.u, &client_cfg.t)
                .await?;
            if outcome.passed {
                println!("audit passed");
            } else {
                println!("audit FAILED");
                std::process::exit(1);
            }
        }
        Command::Read { offset, count, out } => {
            let data = run_read_client(&mut stream, &info, offset, count).await?;
            match out {
                Some(path) => tokio::fs::write(&path, &data).await?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data)?;
                }
            }
            tracing::info!(bytes = data.len(), "read verified");
        }
        Command::Update { initial, final_, data } => {
            let new_bytes = tokio::fs::read(&data).await?;
            run_update_client(
                &mut stream,
                &mut client_cfg,
                &args.client_config,
                initial,
                final_,
                &new_bytes,
            )
            .await?;
            println!("update applied: [{initial}, {final_}]");
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
