//! RFC-6962-style Merkle authenticator over fixed-size blocks of the raw
//! file.
//!
//! The tree shape is "greedy left-complete": the root of `k` leaves has a
//! left subtree of the largest power of two strictly less than `k` (or `k`
//! itself if `k` is already a power of two), recursively.

pub mod config;
pub mod proof;

use crate::error::PorResult;
use crate::hash::HashAlg;
use config::StoreInfo;
use std::path::Path;

const LEAF_PREFIX: u8 = 0x00;
const INTERNAL_PREFIX: u8 = 0x01;

/// `H(0x00 || block)`.
pub fn leaf_hash(alg: HashAlg, block: &[u8]) -> Vec<u8> {
    alg.digest_concat(&[&[LEAF_PREFIX], block])
}

/// `H(0x01 || left || right)`.
pub fn internal_hash(alg: HashAlg, left: &[u8], right: &[u8]) -> Vec<u8> {
    alg.digest_concat(&[&[INTERNAL_PREFIX], left, right])
}

/// Bit length of a `u64`, i.e. `64 - leading_zeros`.
#[inline]
fn bitlen64(x: u64) -> u32 {
    64 - x.leading_zeros()
}

/// Largest power of two strictly less than `n` (requires `n > 1`).
#[inline]
pub fn largest_pow2_less_than(n: u64) -> u64 {
    debug_assert!(n > 1);
    1u64 << (bitlen64(n - 1) - 1)
}

/// Work-space sizing formula: `8` for small trees, else
/// `3*bitlen(nblocks-1) + 2`. This bounds the incremental construction
/// stack and the per-request sibling-hash buffer.
pub fn hashes_needed(nblocks: u64) -> u32 {
    if nblocks <= 16 {
        8
    } else {
        3 * bitlen64(nblocks - 1) + 2
    }
}

/// Builds the tree over `nblocks` blocks read sequentially from `blocks`
/// (each exactly `block_size` bytes, except the last, which may be short),
/// emitting every produced hash (leaf and internal) in post-order to
/// `sink`, and returning the root.
///
/// An incremental-stack algorithm: `nblocks` is consumed in descending
/// powers of two (the largest power of two that fits in the remaining
/// leaves at each step), and after each leaf, any run of trailing set bits
/// in the leaf's pre-increment index triggers that many stack-collapsing
/// combines (`trailing_ones`).
pub fn build_tree<I>(
    alg: HashAlg,
    nblocks: u64,
    mut blocks: I,
    mut sink: impl FnMut(&[u8]),
) -> Vec<u8>
where
    I: Iterator<Item = Vec<u8>>,
{
    let hash_size = alg.hash_size();
    if nblocks == 0 {
        return vec![0u8; hash_size];
    }

    let mut stack: Vec<Vec<u8>> = Vec::with_capacity(hashes_needed(nblocks) as usize);
    let mut remaining = nblocks;

    while remaining > 0 {
        let pow2 = 1u64 << (bitlen64(remaining) - 1);
        for i in 0..pow2 {
            let block = blocks.next().expect("block iterator exhausted early");
            let h = leaf_hash(alg, &block);
            sink(&h);
            stack.push(h);

            // Number of stack-collapsing combines after this leaf is the
            // count of trailing one-bits in `i` (the leaf index *before*
            // this push), equivalently the trailing zero-bits in `i+1`.
            let mut ones = i.trailing_ones();
            while ones > 0 {
                let right = stack.pop().unwrap();
                let left = stack.pop().unwrap();
                let combined = internal_hash(alg, &left, &right);
                sink(&combined);
                stack.push(combined);
                ones -= 1;
            }
        }
        remaining -= pow2;
    }

    while stack.len() >= 2 {
        let right = stack.pop().unwrap();
        let left = stack.pop().unwrap();
        let combined = internal_hash(alg, &left, &right);
        sink(&combined);
        stack.push(combined);
    }

    stack.pop().expect("non-empty tree must leave a root")
}

/// Rewrites the tree file in place after blocks in `touched` have changed on
/// disk: recomputes the touched leaves and every ancestor up to the root,
/// and leaves every other stored hash untouched. Returns the new root.
///
/// Synchronous and blocking — callers run it via `spawn_blocking`.
pub fn refresh_block_range(
    info: &StoreInfo,
    tree_path: &Path,
    data_path: &Path,
    touched: std::ops::Range<u64>,
) -> PorResult<Vec<u8>> {
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Seek, SeekFrom, Write};

    let mut tree_file = OpenOptions::new().read(true).write(true).open(tree_path)?;
    let mut data_file = File::open(data_path)?;
    let hash_size = info.hash_size();

    fn node_offset(index: u64, hash_size: usize) -> u64 {
        (index + 1) * hash_size as u64
    }

    fn read_stored_hash(tree_file: &mut File, index: u64, hash_size: usize) -> std::io::Result<Vec<u8>> {
        tree_file.seek(SeekFrom::Start(node_offset(index, hash_size)))?;
        let mut buf = vec![0u8; hash_size];
        tree_file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_stored_hash(tree_file: &mut File, index: u64, hash: &[u8]) -> std::io::Result<()> {
        tree_file.seek(SeekFrom::Start(node_offset(index, hash.len())))?;
        tree_file.write_all(hash)
    }

    fn read_block(
        data_file: &mut File,
        block_idx: u64,
        block_size: u64,
        file_size: u64,
    ) -> std::io::Result<Vec<u8>> {
        let start = block_idx * block_size;
        let len = block_size.min(file_size.saturating_sub(start)) as usize;
        let mut buf = vec![0u8; len];
        data_file.seek(SeekFrom::Start(start))?;
        data_file.read_exact(&mut buf)?;
        Ok(buf)
    }

    #[allow(clippy::too_many_arguments)]
    fn recurse(
        alg: HashAlg,
        nblocks: u64,
        leaf_start: u64,
        index_offset: u64,
        touched: &std::ops::Range<u64>,
        hash_size: usize,
        block_size: u64,
        file_size: u64,
        tree_file: &mut File,
        data_file: &mut File,
    ) -> std::io::Result<Vec<u8>> {
        let end = leaf_start + nblocks;
        let node_index = index_offset + 2 * nblocks - 2;
        let intersects = leaf_start < touched.end && touched.start < end;
        if !intersects {
            return read_stored_hash(tree_file, node_index, hash_size);
        }
        if nblocks == 1 {
            let block = read_block(data_file, leaf_start, block_size, file_size)?;
            let h = leaf_hash(alg, &block);
            write_stored_hash(tree_file, node_index, &h)?;
            return Ok(h);
        }
        let pow2 = largest_pow2_less_than(nblocks);
        let left = recurse(
            alg, pow2, leaf_start, index_offset, touched, hash_size, block_size, file_size, tree_file,
            data_file,
        )?;
        let right = recurse(
            alg,
            nblocks - pow2,
            leaf_start + pow2,
            index_offset + 2 * pow2 - 1,
            touched,
            hash_size,
            block_size,
            file_size,
            tree_file,
            data_file,
        )?;
        let combined = internal_hash(alg, &left, &right);
        write_stored_hash(tree_file, node_index, &combined)?;
        Ok(combined)
    }

    let root = recurse(
        info.hash_alg,
        info.nblocks(),
        0,
        0,
        &touched,
        hash_size,
        info.block_size as u64,
        info.size,
        &mut tree_file,
        &mut data_file,
    )?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks_of(n: u64, size: usize) -> impl Iterator<Item = Vec<u8>> {
        (0..n).map(move |i| vec![i as u8; size])
    }

    #[test]
    fn single_block_tree_is_just_the_leaf_hash() {
        let alg = HashAlg::Sha256;
        let mut emitted = vec![];
        let root = build_tree(alg, 1, blocks_of(1, 4), |h| emitted.push(h.to_vec()));
        assert_eq!(emitted.len(), 1);
        assert_eq!(root, leaf_hash(alg, &[0u8; 4]));
    }

    #[test]
    fn three_leaf_tree_has_left_subtree_of_two() {
        // k=3: left subtree = largest pow2 < 3 = 2 leaves, right = 1 leaf.
        let alg = HashAlg::Sha256;
        let blocks: Vec<Vec<u8>> = vec![vec![1], vec![2], vec![3]];
        let leaves: Vec<Vec<u8>> = blocks.iter().map(|b| leaf_hash(alg, b)).collect();
        let left = internal_hash(alg, &leaves[0], &leaves[1]);
        let expected_root = internal_hash(alg, &left, &leaves[2]);

        let root = build_tree(alg, 3, blocks.into_iter(), |_| {});
        assert_eq!(root, expected_root);
    }

    #[test]
    fn empty_file_has_zero_root() {
        let alg = HashAlg::Sha256;
        let root = build_tree(alg, 0, std::iter::empty(), |_| {});
        assert_eq!(root, vec![0u8; alg.hash_size()]);
    }

    #[test]
    fn refresh_block_range_matches_full_rebuild() {
        use std::io::Write;

        let alg = HashAlg::Sha256;
        let block_size = 16u32;
        let nblocks = 6u64;
        let size = (nblocks - 1) * block_size as u64 + (block_size as u64 / 2 + 3);

        let mut blocks: Vec<Vec<u8>> = (0..nblocks)
            .map(|i| {
                let len = if i + 1 == nblocks {
                    (size - i * block_size as u64) as usize
                } else {
                    block_size as usize
                };
                vec![(i * 9 + 2) as u8; len]
            })
            .collect();

        let mut data_tmp = tempfile::NamedTempFile::new().unwrap();
        for b in &blocks {
            data_tmp.write_all(b).unwrap();
        }
        data_tmp.flush().unwrap();

        let mut tree_tmp = tempfile::NamedTempFile::new().unwrap();
        let mut info = StoreInfo::new(block_size, alg, size);
        tree_tmp.write_all(&info.metadata_block()).unwrap();
        let root = build_tree(alg, nblocks, blocks.clone().into_iter(), |h| {
            tree_tmp.write_all(h).unwrap();
        });
        info.root = root;
        tree_tmp.flush().unwrap();

        // Mutate block 2 on disk, then refresh just that block's path.
        blocks[2] = vec![0xEE; blocks[2].len()];
        {
            use std::io::{Seek, SeekFrom};
            let mut f = data_tmp.reopen().unwrap();
            f.seek(SeekFrom::Start(2 * block_size as u64)).unwrap();
            f.write_all(&blocks[2]).unwrap();
        }

        let new_root = refresh_block_range(&info, tree_tmp.path(), data_tmp.path(), 2..3).unwrap();

        let expected_root = build_tree(alg, nblocks, blocks.into_iter(), |_| {});
        assert_eq!(new_root, expected_root);
    }

    #[test]
    fn hashes_needed_matches_expected_formula() {
        assert_eq!(hashes_needed(1), 8);
        assert_eq!(hashes_needed(16), 8);
        assert_eq!(hashes_needed(17), 3 * 5 + 2); // bitlen(16) = 5
        assert_eq!(hashes_needed(1_000_000), 3 * bitlen64(999_999) + 2);
    }

    #[test]
    fn largest_pow2_below_examples() {
        assert_eq!(largest_pow2_less_than(2), 1);
        assert_eq!(largest_pow2_less_than(3), 2);
        assert_eq!(largest_pow2_less_than(4), 2);
        assert_eq!(largest_pow2_less_than(5), 4);
        assert_eq!(largest_pow2_less_than(1_000_000), 524288);
    }
}
