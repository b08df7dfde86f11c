//! Range-read proof planning and verification.
//!
//! Fetched blocks are collected into an owned `Vec<Vec<u8>>` indexed by
//! position in the request rather than aliased through a shared scratch
//! buffer; only the placement rules the aliasing once encoded carry any
//! externally visible behavior, and those are preserved exactly.

use super::{internal_hash, leaf_hash, largest_pow2_less_than};
use crate::error::{PorError, PorResult};
use crate::hash::HashAlg;
use crate::merkle::config::StoreInfo;

/// A planned range-read: which blocks and which sibling-hash indices must
/// be fetched to verify bytes `[offset, offset+count)`.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    pub offset: u64,
    pub count: u64,
    pub block_offset: u64,
    pub block_count: u64,
    /// Byte length of the last requested block (may be short only if it is
    /// also the file's final, partial block).
    pub lbsize: u32,
    pub hash_indices: Vec<u64>,
}

impl ReadPlan {
    /// Bounds-checks the requested range and plans the sibling-hash indices
    /// needed to verify it.
    pub fn plan(info: &StoreInfo, offset: u64, count: u64) -> PorResult<Self> {
        if offset + count > info.size {
            return Err(PorError::bounds(format!(
                "read [{offset}, {}) past end of {}-byte store",
                offset + count,
                info.size
            )));
        }
        let block_offset = offset / info.block_size as u64;
        if count == 0 {
            return Ok(ReadPlan {
                offset,
                count,
                block_offset,
                block_count: 0,
                lbsize: 0,
                hash_indices: Vec::new(),
            });
        }

        let block_count = (offset + count - 1) / info.block_size as u64 + 1 - block_offset;
        let nblocks = info.nblocks();
        let tail_partial = info.size % info.block_size as u64 != 0;
        let lbsize = if block_offset + block_count >= nblocks && tail_partial {
            (info.size % info.block_size as u64) as u32
        } else {
            info.block_size
        };

        let mut hash_indices = Vec::new();
        hash_indices_for_range(nblocks, block_offset, block_count, 0, &mut hash_indices);

        Ok(ReadPlan {
            offset,
            count,
            block_offset,
            block_count,
            lbsize,
            hash_indices,
        })
    }

}

/// The sibling-hash indices (absolute, post-order emission positions)
/// needed to rebuild the root around a requested range. Includes the
/// unsigned-subtraction "don't care" value computed (but never read) on the
/// unused side of a fully-consumed split.
pub fn hash_indices_for_range(
    nblocks: u64,
    block_offset: u64,
    block_count: u64,
    index_offset: u64,
    out: &mut Vec<u64>,
) {
    if block_count == 0 {
        out.push(index_offset + 2 * nblocks - 2);
        return;
    }
    if nblocks == 1 {
        return;
    }

    let pow2 = largest_pow2_less_than(nblocks);
    let left_blocks = block_count.min(pow2.saturating_sub(pow2.min(block_offset)));

    hash_indices_for_range(pow2, block_offset, left_blocks, index_offset, out);
    hash_indices_for_range(
        nblocks - pow2,
        block_offset.wrapping_add(left_blocks).wrapping_sub(pow2),
        block_count - left_blocks,
        index_offset + 2 * pow2 - 1,
        out,
    );
}

/// Recomputes the root over `[block_offset, block_offset+block_count)` out
/// of `nblocks` total leaves, consuming
/// `blocks` (the bytes fetched for this request, in request order) at leaf
/// base cases and `hashes` (the fetched sibling hashes, in the same order
/// `hash_indices_for_range` emitted their indices) at disjoint-subtree base
/// cases.
fn compute_hash_range(
    alg: HashAlg,
    nblocks: u64,
    block_offset: u64,
    block_count: u64,
    rblock_off: u64,
    blocks: &[Vec<u8>],
    hashes: &mut std::slice::Iter<Vec<u8>>,
) -> Vec<u8> {
    debug_assert!(nblocks > 0);

    if block_count == 0 {
        return hashes.next().expect("hash iterator exhausted").clone();
    }

    if nblocks == 1 {
        return leaf_hash(alg, &blocks[rblock_off as usize]);
    }

    let pow2 = largest_pow2_less_than(nblocks);
    let left_blocks = block_count.min(pow2.saturating_sub(pow2.min(block_offset)));

    let left = compute_hash_range(alg, pow2, block_offset, left_blocks, rblock_off, blocks, hashes);
    let right = compute_hash_range(
        alg,
        nblocks - pow2,
        block_offset.wrapping_add(left_blocks).wrapping_sub(pow2),
        block_count - left_blocks,
        rblock_off + left_blocks,
        blocks,
        hashes,
    );
    internal_hash(alg, &left, &right)
}

/// Recomputes the root from the fetched `blocks` and `hashes` and compares
/// against `info.root`. `blocks[i]` must be exactly `plan.lbsize` bytes for
/// the last block and `info.block_size` bytes for every other block — only
/// the last block may be short.
///
/// Also assembles the caller's requested `[offset, offset+count)` bytes out
/// of the (possibly wider) fetched blocks.
pub fn verify_and_assemble(
    info: &StoreInfo,
    plan: &ReadPlan,
    blocks: &[Vec<u8>],
    hashes: &[Vec<u8>],
) -> PorResult<Vec<u8>> {
    if plan.count == 0 {
        return Ok(Vec::new());
    }
    if blocks.len() as u64 != plan.block_count {
        return Err(PorError::protocol("wrong number of blocks in read response"));
    }
    if hashes.len() as u64 != plan.hash_indices.len() as u64 {
        return Err(PorError::protocol("wrong number of sibling hashes in read response"));
    }

    let mut hashes_it = hashes.iter();
    let root = compute_hash_range(
        info.hash_alg,
        info.nblocks(),
        plan.block_offset,
        plan.block_count,
        0,
        blocks,
        &mut hashes_it,
    );
    if root != info.root {
        return Err(PorError::IntegrityFail);
    }

    let mut out = vec![0u8; plan.count as usize];
    for (i, block) in blocks.iter().enumerate() {
        let abs_block_index = plan.block_offset + i as u64;
        let block_start = abs_block_index * info.block_size as u64;
        let block_end = block_start + block.len() as u64;
        let req_start = plan.offset.max(block_start);
        let req_end = (plan.offset + plan.count).min(block_end);
        if req_start >= req_end {
            continue;
        }
        let src_off = (req_start - block_start) as usize;
        let dst_off = (req_start - plan.offset) as usize;
        let len = (req_end - req_start) as usize;
        out[dst_off..dst_off + len].copy_from_slice(&block[src_off..src_off + len]);
    }
    Ok(out)
}

/// Byte length on disk of fetched block `i` (0-based) for a given plan —
/// used by the server to know how many bytes to read/send per block.
pub fn fetch_block_len(info: &StoreInfo, plan: &ReadPlan, i: u64) -> u32 {
    if i + 1 == plan.block_count {
        plan.lbsize
    } else {
        info.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::build_tree;

    fn make_store(nblocks: u64, block_size: u32) -> (StoreInfo, Vec<Vec<u8>>) {
        let size = if nblocks == 0 {
            0
        } else {
            (nblocks - 1) * block_size as u64 + (block_size as u64 / 2 + 1)
        };
        let alg = HashAlg::Sha256;
        let mut info = StoreInfo::new(block_size, alg, size);
        let blocks: Vec<Vec<u8>> = (0..info.nblocks())
            .map(|i| {
                let len = if i + 1 == info.nblocks() {
                    (size - i * block_size as u64) as usize
                } else {
                    block_size as usize
                };
                vec![(i * 7 + 3) as u8; len]
            })
            .collect();
        let root = build_tree(alg, info.nblocks(), blocks.iter().cloned(), |_| {});
        info.root = root;
        info.update_signature();
        (info, blocks)
    }

    #[test]
    fn full_range_read_verifies() {
        let (info, blocks) = make_store(5, 16);
        let plan = ReadPlan::plan(&info, 0, info.size).unwrap();
        let fetched: Vec<Vec<u8>> = (0..plan.block_count)
            .map(|i| blocks[(plan.block_offset + i) as usize].clone())
            .collect();
        let fetched_hashes: Vec<Vec<u8>> = vec![vec![]; plan.hash_indices.len()];
        // full-range reads with nblocks>1 still need sibling hashes only for
        // disjoint subtrees, which don't exist when the whole tree is requested.
        assert!(plan.hash_indices.is_empty());
        let data = verify_and_assemble(&info, &plan, &fetched, &fetched_hashes).unwrap();
        assert_eq!(data.len(), info.size as usize);
    }

    #[test]
    fn partial_range_read_verifies_with_siblings() {
        let (info, blocks) = make_store(5, 16);
        let offset = 20u64;
        let count = 40u64;
        let plan = ReadPlan::plan(&info, offset, count).unwrap();
        let fetched: Vec<Vec<u8>> = (0..plan.block_count)
            .map(|i| blocks[(plan.block_offset + i) as usize].clone())
            .collect();

        // Recompute the full tree's node list to pull out sibling hashes by index.
        let mut emitted = Vec::new();
        build_tree(info.hash_alg, info.nblocks(), blocks.iter().cloned(), |h| {
            emitted.push(h.to_vec())
        });
        let sibling_hashes: Vec<Vec<u8>> = plan
            .hash_indices
            .iter()
            .map(|&idx| emitted[idx as usize].clone())
            .collect();

        let data = verify_and_assemble(&info, &plan, &fetched, &sibling_hashes).unwrap();
        assert_eq!(data.len(), count as usize);
        for (i, b) in data.iter().enumerate() {
            let abs = offset + i as u64;
            let block_idx = abs / 16;
            assert_eq!(*b, (block_idx * 7 + 3) as u8);
        }
    }

    #[test]
    fn tampered_block_fails_verification() {
        let (info, blocks) = make_store(5, 16);
        let offset = 20u64;
        let count = 40u64;
        let plan = ReadPlan::plan(&info, offset, count).unwrap();
        let mut fetched: Vec<Vec<u8>> = (0..plan.block_count)
            .map(|i| blocks[(plan.block_offset + i) as usize].clone())
            .collect();
        fetched[0][0] ^= 0xFF;

        let mut emitted = Vec::new();
        build_tree(info.hash_alg, info.nblocks(), blocks.iter().cloned(), |h| {
            emitted.push(h.to_vec())
        });
        let sibling_hashes: Vec<Vec<u8>> = plan
            .hash_indices
            .iter()
            .map(|&idx| emitted[idx as usize].clone())
            .collect();

        let err = verify_and_assemble(&info, &plan, &fetched, &sibling_hashes).unwrap_err();
        assert!(matches!(err, PorError::IntegrityFail));
    }

    #[test]
    fn empty_read_is_a_no_op_success() {
        let (info, _blocks) = make_store(5, 16);
        let plan = ReadPlan::plan(&info, 3, 0).unwrap();
        let data = verify_and_assemble(&info, &plan, &[], &[]).unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn read_past_size_is_bounds_error() {
        let (info, _blocks) = make_store(5, 16);
        let err = ReadPlan::plan(&info, info.size - 1, 10).unwrap_err();
        assert!(matches!(err, PorError::Bounds(_)));
    }
}
