//! Raw-data-file access shared by setup, the audit engine, and the update
//! protocol.
//!
//! Both a `pread`-based path and an `mmap`-based path must produce
//! identical field elements via the byte-packer. `RowSource` abstracts
//! over the two so the setup/audit row loop is written once.

use crate::error::PorResult;
use memmap2::Mmap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Read-only access to the raw data file, row-at-a-time, zero-padding any
/// bytes past the end of the file.
pub enum RowSource {
    Pread { file: File, size: u64 },
    Mmap { mmap: Mmap, size: u64 },
}

impl RowSource {
    /// Opens `path` via the mmap path if `use_mmap` is set, else via `pread`.
    /// The row-parallel setup/audit loops select between the two through
    /// this single entry point rather than hardcoding one path, per the
    /// `#ifdef POR_MMAP` branches in `dual_init.c`/`server.c`.
    pub fn open(path: impl AsRef<Path>, use_mmap: bool) -> PorResult<Self> {
        if use_mmap {
            Self::open_mmap(path)
        } else {
            Self::open_pread(path)
        }
    }

    pub fn open_pread(path: impl AsRef<Path>) -> PorResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(RowSource::Pread { file, size })
    }

    /// # Safety-adjacent note
    /// `mmap`ping a file that is concurrently truncated or written outside
    /// the single-writer discipline the session orchestrator enforces is
    /// undefined behavior in general; this crate only ever opens a mapping
    /// read-only for the duration of one audit computation while the update
    /// path holds the writer lock.
    pub fn open_mmap(path: impl AsRef<Path>) -> PorResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(RowSource::Mmap { mmap, size })
    }

    pub fn size(&self) -> u64 {
        match self {
            RowSource::Pread { size, .. } => *size,
            RowSource::Mmap { size, .. } => *size,
        }
    }

    /// Fills `out` (exactly `bytes_per_row` long) with row `row_index`'s
    /// bytes, zero-padding whatever falls past `size()`.
    pub fn read_row(&self, row_index: u64, bytes_per_row: usize, out: &mut [u8]) -> PorResult<()> {
        debug_assert_eq!(out.len(), bytes_per_row);
        let start = row_index * bytes_per_row as u64;
        let size = self.size();
        if start >= size {
            out.fill(0);
            return Ok(());
        }
        let avail = ((size - start) as usize).min(bytes_per_row);
        match self {
            RowSource::Pread { file, .. } => {
                file.read_exact_at(&mut out[..avail], start)?;
            }
            RowSource::Mmap { mmap, .. } => {
                out[..avail].copy_from_slice(&mmap[start as usize..start as usize + avail]);
            }
        }
        for b in &mut out[avail..] {
            *b = 0;
        }
        Ok(())
    }
}
