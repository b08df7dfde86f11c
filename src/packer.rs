//! Reversible mapping between raw file bytes and field-element "chunks".
//!
//! One row-chunk-group of 8 chunks is built from 7 little-endian `u64`
//! words by a fixed bit-shift/mask recipe rather than a byte-at-a-time
//! read, because the words come straight out of an `mmap`/`pread`'d buffer.

use crate::field::{BYTES_UNDER_P, CHUNK_ALIGN};

const MASK: u64 = (1u64 << 56) - 1;

/// Unpack one row-chunk-group (56 bytes = 7 words) into 8 field chunks.
///
/// `words` must contain exactly 7 little-endian `u64`s; `out` receives
/// exactly 8 chunks, each `< 2^56 < P`.
#[inline]
pub fn unpack_group(words: &[u64; 7], out: &mut [u64; 8]) {
    out[0] = words[0] & MASK;
    for k in 1..7 {
        out[k] = (words[k - 1] >> (64 - 8 * k)) | ((words[k] << (8 * k)) & MASK);
    }
    out[7] = words[6] >> 8;
}

/// Unpack a full row of `bytes_per_row = 7*n` raw bytes (zero-padded by the
/// caller if the underlying file is short) into `n` field chunks.
///
/// `n` must be a multiple of [`CHUNK_ALIGN`]'s chunk count (8), i.e.
/// `n % 8 == 0`, which is guaranteed by the matrix dimension formula in
/// [`crate::audit::setup`].
pub fn unpack_row(row: &[u8], n: usize, out: &mut [u64]) {
    assert_eq!(n % 8, 0, "n must be a multiple of 8");
    assert_eq!(row.len(), BYTES_UNDER_P * n);
    assert_eq!(out.len(), n);

    let mut words = [0u64; 7];
    let mut group = [0u64; 8];
    for (g, chunk_out) in out.chunks_exact_mut(8).enumerate() {
        let base = g * CHUNK_ALIGN;
        for (w, word) in words.iter_mut().enumerate() {
            let off = base + w * 8;
            *word = u64::from_le_bytes(row[off..off + 8].try_into().unwrap());
        }
        unpack_group(&words, &mut group);
        chunk_out.copy_from_slice(&group);
    }
}

/// Naive reference implementation: read 7 little-endian bytes directly per
/// chunk. Used only to cross-check [`unpack_row`] in tests — never on the
/// hot path, since it allocates no differently but makes the byte
/// interpretation explicit rather than derived from shifted words.
#[cfg(test)]
pub fn naive_unpack_row(row: &[u8], n: usize) -> Vec<u64> {
    assert_eq!(row.len(), BYTES_UNDER_P * n);
    (0..n)
        .map(|j| {
            let off = j * BYTES_UNDER_P;
            let mut buf = [0u8; 8];
            buf[..7].copy_from_slice(&row[off..off + 7]);
            u64::from_le_bytes(buf)
        })
        .collect()
}

/// Copies `src` into a `7*n`-byte row buffer, zero-padding any bytes past
/// the end of `src`.
pub fn load_padded_row(src: &[u8], n: usize, out: &mut [u8]) {
    let bytes_per_row = BYTES_UNDER_P * n;
    assert_eq!(out.len(), bytes_per_row);
    let copy_len = src.len().min(bytes_per_row);
    out[..copy_len].copy_from_slice(&src[..copy_len]);
    for b in &mut out[copy_len..] {
        *b = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unpack_row_matches_naive_for_one_group() {
        let mut row = vec![0u8; 56];
        for (i, b) in row.iter_mut().enumerate() {
            *b = (i * 3 + 1) as u8;
        }
        let mut out = vec![0u64; 8];
        unpack_row(&row, 8, &mut out);
        let naive = naive_unpack_row(&row, 8);
        assert_eq!(out, naive);
        for c in &out {
            assert!(*c < (1u64 << 56));
        }
    }

    #[test]
    fn padded_row_zero_fills_tail() {
        let src = b"abcdefg";
        let mut out = vec![0xFFu8; 56];
        load_padded_row(src, 8, &mut out);
        assert_eq!(&out[..7], src);
        assert!(out[7..].iter().all(|&b| b == 0));
    }

    proptest! {
        #[test]
        fn roundtrip_7_byte_buffers(bytes in proptest::collection::vec(any::<u8>(), 56)) {
            let mut out = vec![0u64; 8];
            unpack_row(&bytes, 8, &mut out);
            let naive = naive_unpack_row(&bytes, 8);
            prop_assert_eq!(out.clone(), naive);
            for (j, &chunk) in out.iter().enumerate() {
                prop_assert!(chunk < (1u64 << 56));
                let low7 = chunk.to_le_bytes();
                prop_assert_eq!(&low7[..7], &bytes[j*7..j*7+7]);
            }
        }
    }
}
