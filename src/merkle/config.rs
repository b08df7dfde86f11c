//! The Merkle configuration fingerprint shared between client and server.

use crate::error::{PorError, PorResult};
use crate::hash::HashAlg;
use crate::wire;
use tokio::io::{AsyncRead, AsyncWrite};

/// Default block size, matching `store_info_default`'s `1U << 12`.
pub const DEFAULT_BLOCK_SIZE: u32 = 1 << 12;

/// Merkle configuration fingerprint: block size, hash algorithm, raw file
/// size, and (once computed) the root and its digest "signature".
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub block_size: u32,
    pub hash_alg: HashAlg,
    pub size: u64,
    pub root: Vec<u8>,
    pub signature: Vec<u8>,
}

impl StoreInfo {
    /// Default block size and digest, root/signature left zeroed until
    /// [`crate::merkle::build_tree`] fills them in.
    pub fn new_default(size: u64) -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, HashAlg::DEFAULT, size)
    }

    pub fn new(block_size: u32, hash_alg: HashAlg, size: u64) -> Self {
        let hash_size = hash_alg.hash_size();
        StoreInfo {
            block_size,
            hash_alg,
            size,
            root: vec![0u8; hash_size],
            signature: vec![0u8; hash_size],
        }
    }

    pub fn hash_size(&self) -> usize {
        self.hash_alg.hash_size()
    }

    /// `nblocks = ceil(size / block_size)`, or 0 for an empty file.
    pub fn nblocks(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            1 + (self.size - 1) / self.block_size as u64
        }
    }

    /// Recomputes `signature` as `H(block_size || hash_nid || size || root)`,
    /// the configuration fingerprint used to detect a stale client/server
    /// pairing.
    pub fn update_signature(&mut self) {
        let mut buf = Vec::with_capacity(4 + 4 + 8 + self.root.len());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.hash_alg.to_nid().to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.root);
        self.signature = self.hash_alg.digest(&buf);
    }

    /// Serialises the metadata block `(block_size, hash_nid, size)` padded
    /// with zero bytes to `hash_size`, so that the tree file's hash indices
    /// line up as `(i+1) * hash_size`.
    pub fn metadata_block(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.hash_size());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.hash_alg.to_nid().to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        assert!(buf.len() <= self.hash_size(), "metadata block overflows hash_size");
        buf.resize(self.hash_size(), 0);
        buf
    }

    /// Writes `(block_size, hash_nid, size[, root])` in little-endian order
    /// to `w`.
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W, include_root: bool) -> PorResult<()> {
        wire::write_u32_le(w, self.block_size).await?;
        wire::write_u32_le(w, self.hash_alg.to_nid()).await?;
        wire::write_u64_le(w, self.size).await?;
        if include_root {
            wire::write_all_bytes(w, &self.root).await?;
        }
        Ok(())
    }

    /// Reads `(block_size, hash_nid, size[, root])`, fills in the derived
    /// fields, and (if loaded) recomputes the signature.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R, include_root: bool) -> PorResult<Self> {
        let block_size = wire::read_u32_le(r).await?;
        let hash_nid = wire::read_u32_le(r).await?;
        let size = wire::read_u64_le(r).await?;
        let hash_alg = HashAlg::from_nid(hash_nid)?;
        if block_size == 0 {
            return Err(PorError::config("block_size must be nonzero"));
        }
        let mut info = StoreInfo::new(block_size, hash_alg, size);
        if include_root {
            let root = wire::read_exact_vec(r, info.hash_size()).await?;
            info.root = root;
            info.update_signature();
        }
        Ok(info)
    }
}
