//! Little-endian framing helpers for the TCP wire protocol.
//!
//! Every field is a fixed-size little-endian integer or byte blob, and a
//! short read/write is always an error, never silently tolerated.

use crate::error::{PorError, PorResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub async fn read_u8<R: AsyncRead + Unpin>(r: &mut R) -> PorResult<u8> {
    Ok(r.read_u8().await?)
}

pub async fn write_u8<W: AsyncWrite + Unpin>(w: &mut W, v: u8) -> PorResult<()> {
    w.write_u8(v).await?;
    Ok(())
}

pub async fn read_u32_le<R: AsyncRead + Unpin>(r: &mut R) -> PorResult<u32> {
    Ok(r.read_u32_le().await?)
}

pub async fn write_u32_le<W: AsyncWrite + Unpin>(w: &mut W, v: u32) -> PorResult<()> {
    w.write_u32_le(v).await?;
    Ok(())
}

pub async fn read_u64_le<R: AsyncRead + Unpin>(r: &mut R) -> PorResult<u64> {
    Ok(r.read_u64_le().await?)
}

pub async fn write_u64_le<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> PorResult<()> {
    w.write_u64_le(v).await?;
    Ok(())
}

pub async fn read_f64_le<R: AsyncRead + Unpin>(r: &mut R) -> PorResult<f64> {
    Ok(r.read_f64_le().await?)
}

pub async fn write_f64_le<W: AsyncWrite + Unpin>(w: &mut W, v: f64) -> PorResult<()> {
    w.write_f64_le(v).await?;
    Ok(())
}

/// Read exactly `n` reduced field elements as little-endian `u64`s.
pub async fn read_u64_vec<R: AsyncRead + Unpin>(r: &mut R, n: usize) -> PorResult<Vec<u64>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_u64_le(r).await?);
    }
    Ok(out)
}

/// Write a slice of field elements as little-endian `u64`s.
pub async fn write_u64_slice<W: AsyncWrite + Unpin>(w: &mut W, values: &[u64]) -> PorResult<()> {
    for &v in values {
        write_u64_le(w, v).await?;
    }
    Ok(())
}

pub async fn read_exact_vec<R: AsyncRead + Unpin>(r: &mut R, len: usize) -> PorResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_all_bytes<W: AsyncWrite + Unpin>(w: &mut W, buf: &[u8]) -> PorResult<()> {
    w.write_all(buf).await?;
    Ok(())
}

/// Validate an incoming op byte against the three recognised operations.
pub fn parse_op(byte: u8) -> PorResult<char> {
    match byte {
        b'A' | b'R' | b'U' => Ok(byte as char),
        other => Err(PorError::protocol(format!(
            "unknown op byte {:#04x} (expected 'A', 'R', or 'U')",
            other
        ))),
    }
}
