//! The linear-algebra audit: setup, the audit round, and the read round.

pub mod protocol;
pub mod read;
pub mod setup;

use crate::error::{PorError, PorResult};
use crate::field::{BYTES_UNDER_P, CHUNK_ALIGN};

/// Matrix dimensions for a file of `file_size` bytes.
///
/// `num_chunks = 1 + (file_size-1)/7`, `n = ceil(sqrt(num_chunks)/56)*56`,
/// `m = 1 + (num_chunks-1)/n`, using integer ceiling division throughout.
/// An empty file has no well-defined matrix and is rejected outright.
pub fn dims(file_size: u64) -> PorResult<(u64, u64, u64)> {
    if file_size == 0 {
        return Err(PorError::config("setup requires a nonempty file"));
    }
    let num_chunks = 1 + (file_size - 1) / BYTES_UNDER_P as u64;
    let sqrt_chunks = (num_chunks as f64).sqrt();
    let n = (sqrt_chunks / CHUNK_ALIGN as f64).ceil() as u64 * CHUNK_ALIGN as u64;
    let m = 1 + (num_chunks - 1) / n;
    Ok((num_chunks, n, m))
}
