//! The update protocol (`'U'`): a contiguous byte range is rewritten one
//! 8-byte *chunk window* at a time, interleaved with the client over the
//! wire.
//!
//! The server is the only party with direct access to the raw file, so it
//! is also the party that computes the exact `t`-vector deltas: a single
//! byte write can change up to two field-level chunks (the row-chunk-group
//! recipe in [`crate::packer`] reads 7 words to produce 8 chunks, so a
//! changed word feeds into two adjacent chunks), and determining which
//! requires the group's *other*, unchanged words — bytes the client never
//! otherwise sees. After the interleaved per-window exchange completes, the
//! server sends a list of `(chunk_index, delta)` pairs and the client folds
//! them into `t`. The client never has to guess a chunk index from a raw
//! byte offset at all.

use crate::config::{ClientConfig, ServerConfig};
use crate::error::{PorError, PorResult};
use crate::field;
use crate::merkle::config::StoreInfo;
use crate::packer;
use crate::wire;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// `(new - old) mod P`, handling the underflow case with a `+ P` correction.
fn chunk_delta(old: u64, new: u64) -> u64 {
    if new >= old {
        new - old
    } else {
        field::P - (old - new)
    }
}

/// Client side: streams `new_bytes` (exactly `final - initial + 1` bytes,
/// one byte per position in `[initial, final]`) into the update window by
/// window, applies the server's returned `t`-deltas to `cfg`, and rewrites
/// the client config file at `config_path` once the range completes.
pub async fn run_update_client<S>(
    stream: &mut S,
    cfg: &mut ClientConfig,
    config_path: &Path,
    initial: u64,
    final_: u64,
    new_bytes: &[u8],
) -> PorResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if final_ < initial {
        return Err(PorError::bounds("update range final < initial"));
    }
    if new_bytes.len() as u64 != final_ - initial + 1 {
        return Err(PorError::protocol(
            "new_bytes length must equal final - initial + 1",
        ));
    }

    wire::write_u8(stream, b'U').await?;
    wire::write_u64_le(stream, initial).await?;
    wire::write_u64_le(stream, final_).await?;
    stream.flush().await?;

    let mut curr = initial;
    let mut k = 0usize;
    while curr <= final_ {
        if curr % 8 == 0 || curr == initial {
            // The old 8-byte window value, read here purely to stay in
            // lockstep with the server; the library caller already
            // supplied the new bytes up front.
            let _old_word = wire::read_u64_le(stream).await?;
        }

        wire::write_u8(stream, new_bytes[k]).await?;
        k += 1;

        if curr % 8 == 7 || curr == final_ {
            stream.flush().await?;
        }
        curr += 1;
    }

    let ndelta = wire::read_u32_le(stream).await?;
    for _ in 0..ndelta {
        let q = wire::read_u64_le(stream).await?;
        let delta = wire::read_u64_le(stream).await?;
        let row = (q / cfg.n) as usize;
        let col = (q % cfg.n) as usize;
        cfg.t[col] = field::add_reduce(cfg.t[col], field::mul_reduce(cfg.u[row], delta));
    }

    let mut buf = Vec::new();
    cfg.write(&mut buf).await?;
    tokio::fs::write(config_path, &buf).await?;

    Ok(())
}

/// Reads the 56-byte row-chunk-group containing byte `group_idx * 56`,
/// zero-padding past end of file, as 7 little-endian words.
async fn read_group_words(data_file: &mut File, group_idx: u64, file_size: u64) -> PorResult<[u64; 7]> {
    let start = group_idx * 56;
    let mut buf = [0u8; 56];
    if start < file_size {
        let avail = ((file_size - start) as usize).min(56);
        data_file.seek(SeekFrom::Start(start)).await?;
        data_file.read_exact(&mut buf[..avail]).await?;
    }
    let mut words = [0u64; 7];
    for (k, word) in words.iter_mut().enumerate() {
        *word = u64::from_le_bytes(buf[k * 8..k * 8 + 8].try_into().unwrap());
    }
    Ok(words)
}

/// Server side: the op byte `'U'` has already been consumed by the
/// orchestrator's dispatch. Rewrites `[initial, final]` in the data file
/// window by window, tracks the row-chunk-groups touched, computes the
/// resulting `t`-vector deltas, and refreshes the Merkle tree (leaf and
/// ancestors) over the touched block range — mutating `info.root` in place
/// and rewriting `merkle_config_path` so the fingerprint stays durable,
/// with every write fully flushed before the server signals completion.
pub async fn run_update_server<S>(
    stream: &mut S,
    cfg: &ServerConfig,
    info: &mut StoreInfo,
    tree_path: &Path,
    merkle_config_path: &Path,
) -> PorResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let initial = wire::read_u64_le(stream).await?;
    let final_ = wire::read_u64_le(stream).await?;
    if final_ < initial || final_ >= info.size {
        return Err(PorError::bounds(format!(
            "update range [{initial}, {final_}] out of bounds for {}-byte store",
            info.size
        )));
    }

    let mut data_file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cfg.data_path)
        .await?;
    let file_size = data_file.metadata().await?.len();

    let mut orig_groups: HashMap<u64, [u64; 7]> = HashMap::new();
    let mut cur_groups: HashMap<u64, [u64; 7]> = HashMap::new();

    let mut curr = initial;
    let mut window_start = 0u64;
    let mut group_idx = 0u64;
    let mut word_in_group = 0usize;
    let mut old_word = 0u64;
    let mut word_bytes = [0u8; 8];

    while curr <= final_ {
        if curr % 8 == 0 || curr == initial {
            window_start = curr - curr % 8;
            let word_global = window_start / 8;
            group_idx = word_global / 7;
            word_in_group = (word_global % 7) as usize;

            if let std::collections::hash_map::Entry::Vacant(e) = orig_groups.entry(group_idx) {
                let words = read_group_words(&mut data_file, group_idx, file_size).await?;
                e.insert(words);
                cur_groups.insert(group_idx, words);
            }
            old_word = orig_groups[&group_idx][word_in_group];
            wire::write_u64_le(stream, old_word).await?;
            stream.flush().await?;
            word_bytes = old_word.to_le_bytes();
        }

        let b = wire::read_u8(stream).await?;
        word_bytes[(curr - window_start) as usize] = b;

        if curr % 8 == 7 || curr == final_ {
            let new_word = u64::from_le_bytes(word_bytes);
            if new_word != old_word {
                data_file.seek(SeekFrom::Start(window_start)).await?;
                data_file.write_all(&word_bytes).await?;
                cur_groups.get_mut(&group_idx).unwrap()[word_in_group] = new_word;
            }
        }
        curr += 1;
    }
    data_file.flush().await?;

    let mut deltas: Vec<(u64, u64)> = Vec::new();
    for (&g, cur_words) in &cur_groups {
        let orig_words = &orig_groups[&g];
        if cur_words == orig_words {
            continue;
        }
        let mut before = [0u64; 8];
        packer::unpack_group(orig_words, &mut before);
        let mut after = [0u64; 8];
        packer::unpack_group(cur_words, &mut after);
        for c in 0..8 {
            if before[c] != after[c] {
                deltas.push((g * 8 + c as u64, chunk_delta(before[c], after[c])));
            }
        }
    }
    deltas.sort_unstable_by_key(|&(q, _)| q);

    wire::write_u32_le(stream, deltas.len() as u32).await?;
    for &(q, delta) in &deltas {
        wire::write_u64_le(stream, q).await?;
        wire::write_u64_le(stream, delta).await?;
    }
    stream.flush().await?;

    let block_size = info.block_size as u64;
    let first_block = initial / block_size;
    let last_block = final_ / block_size;
    let info_snapshot = info.clone();
    let tree_path_owned = tree_path.to_path_buf();
    let data_path_owned = cfg.data_path.clone();
    let new_root = tokio::task::spawn_blocking(move || {
        crate::merkle::refresh_block_range(
            &info_snapshot,
            &tree_path_owned,
            &data_path_owned,
            first_block..last_block + 1,
        )
    })
    .await
    .map_err(|e| PorError::protocol(format!("merkle refresh worker panicked: {e}")))??;

    info.root = new_root;
    info.update_signature();

    let mut merkle_buf = Vec::new();
    info.write(&mut merkle_buf, true).await?;
    tokio::fs::write(merkle_config_path, &merkle_buf).await?;

    Ok(())
}
