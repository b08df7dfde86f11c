//! The read wire round (`'R'`): fetches a byte range from the server and
//! verifies it against the Merkle root before returning it to the caller.

use crate::error::{PorError, PorResult};
use crate::merkle::config::StoreInfo;
use crate::merkle::proof::{fetch_block_len, verify_and_assemble, ReadPlan};
use crate::wire;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Client side: plans the range read, fetches the sibling hashes and raw
/// blocks one at a time (not batched — interleaved index-then-hash), then
/// verifies and returns the requested bytes.
pub async fn run_read_client<S>(stream: &mut S, info: &StoreInfo, offset: u64, count: u64) -> PorResult<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    wire::write_u8(stream, b'R').await?;

    let plan = ReadPlan::plan(info, offset, count)?;

    wire::write_u32_le(stream, plan.hash_indices.len() as u32).await?;
    let mut hashes = Vec::with_capacity(plan.hash_indices.len());
    for &idx in &plan.hash_indices {
        wire::write_u64_le(stream, idx).await?;
        hashes.push(wire::read_exact_vec(stream, info.hash_size()).await?);
    }

    wire::write_u64_le(stream, plan.block_count).await?;
    wire::write_u64_le(stream, plan.block_offset).await?;
    wire::write_u32_le(stream, plan.lbsize).await?;
    stream.flush().await?;

    let mut blocks = Vec::with_capacity(plan.block_count as usize);
    for i in 0..plan.block_count {
        let len = fetch_block_len(info, &plan, i) as usize;
        blocks.push(wire::read_exact_vec(stream, len).await?);
    }

    verify_and_assemble(info, &plan, &blocks, &hashes)
}

/// Server side: the op byte `'R'` has already been consumed by the
/// orchestrator's dispatch. Reads the client's hash-index/block-range
/// request and streams back hashes (from the tree file) then data blocks
/// (from the raw data file).
pub async fn run_read_server<S>(
    stream: &mut S,
    data_path: &Path,
    tree_path: &Path,
    info: &StoreInfo,
) -> PorResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nhash = wire::read_u32_le(stream).await?;
    let mut tree_file = File::open(tree_path).await?;
    for _ in 0..nhash {
        let idx = wire::read_u64_le(stream).await?;
        let hash = read_hash_at(&mut tree_file, idx, info.hash_size()).await?;
        wire::write_all_bytes(stream, &hash).await?;
    }
    stream.flush().await?;

    let block_count = wire::read_u64_le(stream).await?;
    let block_offset = wire::read_u64_le(stream).await?;
    let lbsize = wire::read_u32_le(stream).await?;

    let mut data_file = File::open(data_path).await?;
    for i in 0..block_count {
        let len = if i + 1 == block_count { lbsize } else { info.block_size } as usize;
        let abs = (block_offset + i) * info.block_size as u64;
        data_file.seek(SeekFrom::Start(abs)).await?;
        let mut buf = vec![0u8; len];
        data_file.read_exact(&mut buf).await?;
        wire::write_all_bytes(stream, &buf).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Seeks to `(index+1) * hash_size` in the tree file and reads one hash.
/// Out-of-bounds indices or short reads are `Bounds` failures.
async fn read_hash_at(tree_file: &mut File, index: u64, hash_size: usize) -> PorResult<Vec<u8>> {
    let offset = (index + 1) * hash_size as u64;
    tree_file
        .seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| PorError::bounds(format!("hash index {index} out of bounds: {e}")))?;
    let mut buf = vec![0u8; hash_size];
    tree_file
        .read_exact(&mut buf)
        .await
        .map_err(|_| PorError::bounds(format!("short read for hash index {index}")))?;
    Ok(buf)
}
