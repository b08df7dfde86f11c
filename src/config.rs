//! Client and server persistent configuration files.

use crate::error::{PorError, PorResult};
use crate::wire;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

/// Client persistent state: matrix dimensions, the secret vector `u`, and
/// the tag vector `t`. Layout: `u64 n; u64 m; u64[m] u; u64[n] t`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub n: u64,
    pub m: u64,
    pub u: Vec<u64>,
    pub t: Vec<u64>,
}

impl ClientConfig {
    pub fn new(n: u64, m: u64, u: Vec<u64>, t: Vec<u64>) -> Self {
        debug_assert_eq!(u.len() as u64, m);
        debug_assert_eq!(t.len() as u64, n);
        ClientConfig { n, m, u, t }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> PorResult<()> {
        wire::write_u64_le(w, self.n).await?;
        wire::write_u64_le(w, self.m).await?;
        wire::write_u64_slice(w, &self.u).await?;
        wire::write_u64_slice(w, &self.t).await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> PorResult<Self> {
        let n = wire::read_u64_le(r).await?;
        let m = wire::read_u64_le(r).await?;
        let u = wire::read_u64_vec(r, m as usize).await?;
        let t = wire::read_u64_vec(r, n as usize).await?;
        Ok(ClientConfig { n, m, u, t })
    }
}

/// Server persistent state: matrix dimensions and the path to the raw data
/// file. Layout: `u64 n; u64 m; i32 path_size; u8[path_size] data_path`
/// (NUL-terminated).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub n: u64,
    pub m: u64,
    pub data_path: PathBuf,
}

impl ServerConfig {
    pub fn new(n: u64, m: u64, data_path: impl Into<PathBuf>) -> Self {
        ServerConfig {
            n,
            m,
            data_path: data_path.into(),
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> PorResult<()> {
        wire::write_u64_le(w, self.n).await?;
        wire::write_u64_le(w, self.m).await?;

        let c_path = path_to_cstring(&self.data_path)?;
        let bytes = c_path.as_bytes_with_nul();
        wire::write_u32_le(w, bytes.len() as u32).await?;
        wire::write_all_bytes(w, bytes).await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> PorResult<Self> {
        let n = wire::read_u64_le(r).await?;
        let m = wire::read_u64_le(r).await?;
        let path_size = wire::read_u32_le(r).await? as usize;
        let raw = wire::read_exact_vec(r, path_size).await?;
        let trimmed = match raw.iter().position(|&b| b == 0) {
            Some(nul_at) => &raw[..nul_at],
            None => &raw[..],
        };
        let data_path = PathBuf::from(String::from_utf8_lossy(trimmed).into_owned());
        Ok(ServerConfig { n, m, data_path })
    }
}

fn path_to_cstring(path: &Path) -> PorResult<CString> {
    let s = path
        .to_str()
        .ok_or_else(|| PorError::config("data path is not valid UTF-8"))?;
    CString::new(s).map_err(|_| PorError::config("data path contains an interior NUL"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_config_roundtrips() {
        let cfg = ClientConfig::new(16, 8, vec![1, 2, 3, 4, 5, 6, 7, 8], vec![9; 16]);
        let mut buf = Vec::new();
        cfg.write(&mut buf).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let loaded = ClientConfig::read(&mut cursor).await.unwrap();
        assert_eq!(loaded.n, cfg.n);
        assert_eq!(loaded.m, cfg.m);
        assert_eq!(loaded.u, cfg.u);
        assert_eq!(loaded.t, cfg.t);
    }

    #[tokio::test]
    async fn server_config_roundtrips() {
        let cfg = ServerConfig::new(56, 56, "/tmp/some/data-file.bin");
        let mut buf = Vec::new();
        cfg.write(&mut buf).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let loaded = ServerConfig::read(&mut cursor).await.unwrap();
        assert_eq!(loaded.n, cfg.n);
        assert_eq!(loaded.m, cfg.m);
        assert_eq!(loaded.data_path, cfg.data_path);
    }
}
