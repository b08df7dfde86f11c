//! Setup: computes the tag vector `t = u . M` over the whole file.
//!
//! Each worker owns a disjoint, statically-assigned range of rows,
//! accumulates its own partial tag vector with deferred reduction, and the
//! partials are summed (modular addition, so order-independent) once every
//! worker has finished.

use crate::config::{ClientConfig, ServerConfig};
use crate::datafile::RowSource;
use crate::error::PorResult;
use crate::field::{self, Accumulator, BYTES_UNDER_P};
use crate::packer;
use crate::prng;
use rayon::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// One worker's share of the row-parallel reduction: accumulates `u[i] *
/// M[i][j]` for `i` in `row_range`, deferred-reducing via [`Accumulator`]
/// exactly as the single-threaded row loop would, just over fewer rows.
fn accumulate_rows(
    rows: &RowSource,
    row_range: std::ops::Range<u64>,
    u: &[u64],
    n: usize,
) -> PorResult<Vec<u64>> {
    let bytes_per_row = BYTES_UNDER_P * n;
    let mut row_buf = vec![0u8; bytes_per_row];
    let mut chunks = vec![0u64; n];
    let mut acc = vec![Accumulator::new(); n];

    for i in row_range {
        rows.read_row(i, bytes_per_row, &mut row_buf)?;
        packer::unpack_row(&row_buf, n, &mut chunks);
        let ui = u[i as usize];
        for j in 0..n {
            acc[j].fma_accum(ui, chunks[j]);
        }
    }

    Ok(acc.into_iter().map(Accumulator::final_reduce).collect())
}

/// Computes `t` from `u`, the file at `data_path`, and dimensions `(n, m)`,
/// splitting the `m` rows into `num_workers` static, disjoint ranges and
/// summing the resulting partial vectors. Modular addition is commutative
/// and associative, so the result does not depend on `num_workers`.
pub fn compute_tag_vector(
    data_path: &Path,
    u: &[u64],
    n: u64,
    m: u64,
    num_workers: usize,
    use_mmap: bool,
) -> PorResult<Vec<u64>> {
    let rows = RowSource::open(data_path, use_mmap)?;
    let num_workers = num_workers.max(1);
    let chunk_size = ((m as usize) + num_workers - 1) / num_workers;

    let partials: Vec<Vec<u64>> = (0..num_workers)
        .into_par_iter()
        .map(|w| {
            let start = (w * chunk_size).min(m as usize) as u64;
            let end = ((w + 1) * chunk_size).min(m as usize) as u64;
            if start >= end {
                return Ok(vec![0u64; n as usize]);
            }
            debug!(worker = w, start, end, "accumulating row range");
            accumulate_rows(&rows, start..end, u, n as usize)
        })
        .collect::<PorResult<Vec<_>>>()?;

    let mut t = vec![0u64; n as usize];
    for partial in &partials {
        for j in 0..n as usize {
            t[j] = field::add_reduce(t[j], partial[j]);
        }
    }
    Ok(t)
}

/// Full setup pipeline: derive `(n, m)` from the file size, generate the
/// seeded secret vector `u`, compute `t`, and produce the client/server
/// configs to persist.
pub fn run_setup(data_path: &Path, seed: u64, use_mmap: bool) -> PorResult<(ClientConfig, ServerConfig)> {
    let file_size = std::fs::metadata(data_path)?.len();
    let (num_chunks, n, m) = super::dims(file_size)?;
    info!(file_size, num_chunks, n, m, seed, use_mmap, "running setup");

    let mut u = vec![0u64; m as usize];
    prng::fill_seeded(seed, &mut u);

    let num_workers = num_cpus::get();
    let t = compute_tag_vector(data_path, &u, n, m, num_workers, use_mmap)?;

    let canonical_path = std::fs::canonicalize(data_path)?;
    let client_cfg = ClientConfig::new(n, m, u, t);
    let server_cfg = ServerConfig::new(n, m, canonical_path);
    Ok((client_cfg, server_cfg))
}
