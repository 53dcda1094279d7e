//! Byte-exact file comparison.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::MIB;

pub const CHUNK_BYTES: usize = 4 * MIB as usize;

/// Fails on the first size or content difference between `left` and `right`.
pub fn assert_same_file(left: &Path, right: &Path) -> Result<()> {
    assert_same_file_chunked(left, right, CHUNK_BYTES)
}

pub fn assert_same_file_chunked(left: &Path, right: &Path, chunk_bytes: usize) -> Result<()> {
    let left_len = file_len(left)?;
    let right_len = file_len(right)?;
    if left_len != right_len {
        warn!(left = %left.display(), right = %right.display(), left_len, right_len, "size mismatch");
        return Err(HarnessError::SizeMismatch {
            left: left.to_path_buf(),
            right: right.to_path_buf(),
            left_len,
            right_len,
        });
    }

    let mut fa = File::open(left).map_err(|e| HarnessError::io_at("open", left, e))?;
    let mut fb = File::open(right).map_err(|e| HarnessError::io_at("open", right, e))?;
    let chunk_bytes = chunk_bytes.max(1);
    let mut ba = vec![0u8; chunk_bytes];
    let mut bb = vec![0u8; chunk_bytes];
    let mut offset: u64 = 0;
    loop {
        let na = read_chunk(&mut fa, &mut ba).map_err(|e| HarnessError::io_at("read", left, e))?;
        let nb = read_chunk(&mut fb, &mut bb).map_err(|e| HarnessError::io_at("read", right, e))?;
        if na != nb || ba[..na] != bb[..nb] {
            let at = ba[..na]
                .iter()
                .zip(&bb[..nb])
                .position(|(x, y)| x != y)
                .unwrap_or(na.min(nb));
            let offset = offset + at as u64;
            warn!(left = %left.display(), right = %right.display(), offset, "content mismatch");
            return Err(HarnessError::ContentMismatch {
                left: left.to_path_buf(),
                right: right.to_path_buf(),
                offset,
            });
        }
        if na == 0 {
            break;
        }
        offset += na as u64;
    }
    debug!(left = %left.display(), right = %right.display(), bytes = offset, "files identical");
    Ok(())
}

pub(crate) fn file_len(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| HarnessError::io_at("stat", path, e))
}

/// Fills `buf` unless end of file comes first; returns bytes read.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
