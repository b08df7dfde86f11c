//! Digest provider abstraction: a small [`HashAlg`] enum acts as a stable,
//! serializable algorithm identifier, dispatching to `sha2`.

use crate::error::{PorError, PorResult};
use sha2::{Digest, Sha256, Sha512, Sha512_224};

/// Stable numeric identifiers for the supported digest algorithms. The
/// numeric values are this crate's own and only need to round-trip
/// through the Merkle config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    /// Default algorithm.
    Sha512_224,
    Sha256,
    Sha512,
}

impl HashAlg {
    pub const DEFAULT: HashAlg = HashAlg::Sha512_224;

    pub fn to_nid(self) -> u32 {
        match self {
            HashAlg::Sha512_224 => 1,
            HashAlg::Sha256 => 2,
            HashAlg::Sha512 => 3,
        }
    }

    pub fn from_nid(nid: u32) -> PorResult<Self> {
        match nid {
            1 => Ok(HashAlg::Sha512_224),
            2 => Ok(HashAlg::Sha256),
            3 => Ok(HashAlg::Sha512),
            other => Err(PorError::config(format!("unknown hash_nid {other}"))),
        }
    }

    pub fn hash_size(self) -> usize {
        match self {
            HashAlg::Sha512_224 => 28,
            HashAlg::Sha256 => 32,
            HashAlg::Sha512 => 64,
        }
    }

    /// One-shot digest over `data`. No streaming state is ever kept across
    /// calls; every leaf and internal hash is computed independently.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlg::Sha512_224 => Sha512_224::digest(data).to_vec(),
            HashAlg::Sha256 => Sha256::digest(data).to_vec(),
            HashAlg::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Multi-part digest helper for internal Merkle nodes and for
    /// prefix-tagged leaf hashing.
    pub fn digest_concat(self, parts: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for p in parts {
            buf.extend_from_slice(p);
        }
        self.digest(&buf)
    }
}
