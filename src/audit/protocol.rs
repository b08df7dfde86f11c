//! The audit wire round (`'A'`): challenge send, ack wait, response read,
//! and verdict, mirrored by an ack, row-parallel dot product, and response
//! send on the server side.

use crate::config::ServerConfig;
use crate::datafile::RowSource;
use crate::error::{PorError, PorResult};
use crate::field::{Accumulator, BYTES_UNDER_P};
use crate::packer;
use crate::prng;
use crate::wire;
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Result of one audit round: `lhs == rhs` per the correctness equation,
/// reported to the caller as an ordinary value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditOutcome {
    pub passed: bool,
}

/// Computes `y[i] = sum_j M[i][j] * c[j] mod P` for every row, partitioned
/// across `num_workers` static row ranges the same way [`super::setup`]
/// partitions the setup reduction.
pub fn compute_response(
    data_path: &Path,
    c: &[u64],
    n: u64,
    m: u64,
    num_workers: usize,
    use_mmap: bool,
) -> PorResult<Vec<u64>> {
    let rows = RowSource::open(data_path, use_mmap)?;
    let num_workers = num_workers.max(1);
    let chunk_size = ((m as usize) + num_workers - 1) / num_workers;
    let bytes_per_row = BYTES_UNDER_P * n as usize;

    let parts: Vec<(u64, Vec<u64>)> = (0..num_workers)
        .into_par_iter()
        .map(|w| -> PorResult<(u64, Vec<u64>)> {
            let start = (w * chunk_size).min(m as usize) as u64;
            let end = ((w + 1) * chunk_size).min(m as usize) as u64;
            if start >= end {
                return Ok((start, Vec::new()));
            }
            let mut row_buf = vec![0u8; bytes_per_row];
            let mut chunks = vec![0u64; n as usize];
            let mut out = vec![0u64; (end - start) as usize];
            for i in start..end {
                rows.read_row(i, bytes_per_row, &mut row_buf)?;
                packer::unpack_row(&row_buf, n as usize, &mut chunks);
                let mut acc = Accumulator::new();
                for j in 0..n as usize {
                    acc.fma_accum(chunks[j], c[j]);
                }
                out[(i - start) as usize] = acc.final_reduce();
            }
            Ok((start, out))
        })
        .collect::<PorResult<Vec<_>>>()?;

    let mut y = vec![0u64; m as usize];
    for (start, part) in parts {
        for (k, v) in part.into_iter().enumerate() {
            y[start as usize + k] = v;
        }
    }
    Ok(y)
}

/// Client side of the audit round. `n`/`m`/`u`/`t` come from the client's
/// persisted [`crate::config::ClientConfig`]; the stream is whatever
/// transport the orchestrator connected: an op byte, then the
/// challenge/ack/response/comm-time exchange.
pub async fn run_audit_client<S>(
    stream: &mut S,
    n: u64,
    m: u64,
    u: &[u64],
    t: &[u64],
) -> PorResult<AuditOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    wire::write_u8(stream, b'A').await?;
    let c = prng::make_challenge_vector(n as usize)?;
    wire::write_u64_slice(stream, &c).await?;
    stream.flush().await?;

    let start = Instant::now();
    let ack = wire::read_u8(stream).await?;
    if ack != b'1' {
        return Err(PorError::protocol(format!(
            "expected audit ack '1', got {:#04x}",
            ack
        )));
    }

    let y = wire::read_u64_vec(stream, m as usize).await?;
    let comm_time = start.elapsed().as_secs_f64();
    wire::write_f64_le(stream, comm_time).await?;
    stream.flush().await?;

    let mut lhs_acc = Accumulator::new();
    for i in 0..m as usize {
        lhs_acc.fma_accum(u[i], y[i]);
    }
    let lhs = lhs_acc.final_reduce();

    let mut rhs_acc = Accumulator::new();
    for j in 0..n as usize {
        rhs_acc.fma_accum(t[j], c[j]);
    }
    let rhs = rhs_acc.final_reduce();

    Ok(AuditOutcome { passed: lhs == rhs })
}

/// Server side of the audit round; the op byte `'A'` has already been
/// consumed by the session orchestrator's dispatch.
pub async fn run_audit_server<S>(
    stream: &mut S,
    cfg: &ServerConfig,
    num_workers: usize,
    use_mmap: bool,
) -> PorResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let c = wire::read_u64_vec(stream, cfg.n as usize).await?;

    wire::write_u8(stream, b'1').await?;
    stream.flush().await?;

    let data_path = cfg.data_path.clone();
    let (n, m) = (cfg.n, cfg.m);
    let y =
        tokio::task::spawn_blocking(move || compute_response(&data_path, &c, n, m, num_workers, use_mmap))
            .await
            .map_err(|e| PorError::protocol(format!("audit worker panicked: {e}")))??;

    wire::write_u64_slice(stream, &y).await?;
    stream.flush().await?;

    let comm_time = wire::read_f64_le(stream).await?;
    debug!(comm_time, "client reported one-way comm time");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::setup;
    use std::io::Write;

    #[test]
    fn honest_response_satisfies_correctness_equation() {
        // an honest response must satisfy lhs == rhs
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = (0..(1 << 14)).map(|i| ((i * 13 + 5) % 256) as u8).collect();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let (client_cfg, server_cfg) = setup::run_setup(tmp.path(), 12345, false).unwrap();
        let mut c = vec![0u64; client_cfg.n as usize];
        prng::fill_seeded(777, &mut c);

        let y = compute_response(&server_cfg.data_path, &c, server_cfg.n, server_cfg.m, 4, false).unwrap();

        let mut lhs_acc = Accumulator::new();
        for i in 0..client_cfg.m as usize {
            lhs_acc.fma_accum(client_cfg.u[i], y[i]);
        }
        let lhs = lhs_acc.final_reduce();

        let mut rhs_acc = Accumulator::new();
        for j in 0..client_cfg.n as usize {
            rhs_acc.fma_accum(client_cfg.t[j], c[j]);
        }
        let rhs = rhs_acc.final_reduce();

        assert_eq!(lhs, rhs);
    }

    #[test]
    fn corrupted_response_fails_with_overwhelming_probability() {
        // a single corrupted entry must fail the correctness equation
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = (0..(1 << 14)).map(|i| ((i * 17 + 1) % 256) as u8).collect();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let (client_cfg, server_cfg) = setup::run_setup(tmp.path(), 42, false).unwrap();
        let mut c = vec![0u64; client_cfg.n as usize];
        prng::fill_seeded(321, &mut c);

        let mut y = compute_response(&server_cfg.data_path, &c, server_cfg.n, server_cfg.m, 2, false).unwrap();
        y[0] = (y[0] + 1) % crate::field::P;

        let mut lhs_acc = Accumulator::new();
        for i in 0..client_cfg.m as usize {
            lhs_acc.fma_accum(client_cfg.u[i], y[i]);
        }
        let lhs = lhs_acc.final_reduce();

        let mut rhs_acc = Accumulator::new();
        for j in 0..client_cfg.n as usize {
            rhs_acc.fma_accum(client_cfg.t[j], c[j]);
        }
        let rhs = rhs_acc.final_reduce();

        assert_ne!(lhs, rhs);
    }

    #[tokio::test]
    async fn wire_round_trip_passes_over_in_memory_duplex() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let bytes: Vec<u8> = (0..(1 << 13)).map(|i| ((i * 3 + 9) % 256) as u8).collect();
        tmp.write_all(&bytes).unwrap();
        tmp.flush().unwrap();

        let (client_cfg, server_cfg) = setup::run_setup(tmp.path(), 2020, false).unwrap();

        let (mut client_side, mut server_side) = tokio::io::duplex(1 << 20);
        let server_cfg_clone = server_cfg.clone();
        let server_task = tokio::spawn(async move {
            let op = wire::read_u8(&mut server_side).await.unwrap();
            assert_eq!(op, b'A');
            run_audit_server(&mut server_side, &server_cfg_clone, 2, false)
                .await
                .unwrap();
        });

        let outcome = run_audit_client(
            &mut client_side,
            client_cfg.n,
            client_cfg.m,
            &client_cfg.u,
            &client_cfg.t,
        )
        .await
        .unwrap();

        server_task.await.unwrap();
        assert!(outcome.passed);
    }
}
