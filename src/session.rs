//! The session orchestrator: accepts connections and dispatches each one to
//! the matching wire-protocol round.
//!
//! A spawned task handles each connection. The server processes one
//! connection at a time against a given data file: each spawned task is
//! awaited to completion before the next connection is accepted, with a
//! `tokio::sync::Mutex`-guarded session handle as a second line of defense
//! should a future caller relax that sequencing.

use crate::audit;
use crate::config::ServerConfig;
use crate::error::PorResult;
use crate::merkle::config::StoreInfo;
use crate::update;
use crate::wire;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

/// Everything one server process needs to answer `'A'`/`'R'`/`'U'` requests
/// against one data file: the audit engine's server config, the Merkle
/// fingerprint, and where the tree/fingerprint files live on disk.
pub struct Session {
    pub server_cfg: ServerConfig,
    pub info: StoreInfo,
    pub tree_path: PathBuf,
    pub merkle_config_path: PathBuf,
    pub num_workers: usize,
    /// Selects the `mmap`-backed row source over `pread` for the audit's
    /// matrix-vector product (spec §4.4/§5's "Implementation policy").
    pub use_mmap: bool,
}

/// Binds `addr` and serves connections until a `ctrl_c` signal arrives,
/// flushing buffers and closing files deterministically on shutdown.
pub async fn run(addr: std::net::SocketAddr, session: Session) -> PorResult<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    serve(listener, session).await
}

/// Core accept loop, separated from [`run`] so tests can bind an ephemeral
/// port and construct their own listener.
pub async fn serve(listener: TcpListener, session: Session) -> PorResult<()> {
    let session = Arc::new(Mutex::new(session));
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let ctrlc_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            let _ = ctrlc_tx.send(true);
        }
    });

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("shutting down accept loop");
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!(%peer, "accepted connection");
                let session = Arc::clone(&session);
                let handle = tokio::spawn(async move { handle_connection(stream, session).await });
                match handle.await {
                    Ok(Ok(())) => info!(%peer, "closed connection"),
                    Ok(Err(e)) => error!(%peer, error = %e, "connection failed"),
                    Err(e) => error!(%peer, error = %e, "connection task panicked"),
                }
            }
        }
    }
    Ok(())
}

/// Reads the op byte and dispatches to the matching wire-protocol round.
async fn handle_connection(mut stream: TcpStream, session: Arc<Mutex<Session>>) -> PorResult<()> {
    let op_byte = wire::read_u8(&mut stream).await?;
    let op = wire::parse_op(op_byte)?;
    let mut guard = session.lock().await;

    match op {
        'A' => {
            audit::protocol::run_audit_server(
                &mut stream,
                &guard.server_cfg,
                guard.num_workers,
                guard.use_mmap,
            )
            .await?;
        }
        'R' => {
            audit::read::run_read_server(
                &mut stream,
                &guard.server_cfg.data_path,
                &guard.tree_path,
                &guard.info,
            )
            .await?;
        }
        'U' => {
            let tree_path = guard.tree_path.clone();
            let merkle_config_path = guard.merkle_config_path.clone();
            let server_cfg = guard.server_cfg.clone();
            update::run_update_server(
                &mut stream,
                &server_cfg,
                &mut guard.info,
                &tree_path,
                &merkle_config_path,
            )
            .await?;
        }
        other => unreachable!("parse_op only yields 'A'/'R'/'U', got {}", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::setup;
    use crate::hash::HashAlg;
    use crate::merkle::build_tree;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn spawn_test_server(bytes: &[u8]) -> (std::net::SocketAddr, tempfile::NamedTempFile) {
        let mut data = tempfile::NamedTempFile::new().unwrap();
        data.write_all(bytes).unwrap();
        data.flush().unwrap();

        let (_client_cfg, server_cfg) = setup::run_setup(data.path(), 7, false).unwrap();

        let alg = HashAlg::Sha256;
        let block_size = 16u32;
        let mut info = StoreInfo::new(block_size, alg, bytes.len() as u64);
        let nblocks = info.nblocks();
        let blocks: Vec<Vec<u8>> = (0..nblocks)
            .map(|i| {
                let start = (i * block_size as u64) as usize;
                let end = (start + block_size as usize).min(bytes.len());
                bytes[start..end].to_vec()
            })
            .collect();
        let mut tree = tempfile::NamedTempFile::new().unwrap();
        tree.write_all(&info.metadata_block()).unwrap();
        let root = build_tree(alg, nblocks, blocks.into_iter(), |h| tree.write_all(h).unwrap());
        info.root = root;
        info.update_signature();
        tree.flush().unwrap();

        let merkle_cfg = tempfile::NamedTempFile::new().unwrap();

        let session = Session {
            server_cfg,
            info,
            tree_path: tree.path().to_path_buf(),
            merkle_config_path: merkle_cfg.path().to_path_buf(),
            num_workers: 2,
            use_mmap: false,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = serve(listener, session).await;
        });

        // Keep the temp files alive for the server's lifetime by leaking
        // their handles into the returned tuple's owner.
        std::mem::forget(tree);
        std::mem::forget(merkle_cfg);
        (addr, data)
    }

    #[tokio::test]
    async fn rejects_unknown_op_byte() {
        let (addr, _data) = spawn_test_server(b"hello world, this is a test payload!!!!").await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_u8(b'Z').await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0, "server must close the connection on an unknown op byte");
    }
}
