//! Bounded file loading for executable images.
//!
//! `SafeReader` maps the file read-only and refuses anything larger than the
//! configured limit. The byte buffer owns its data, so callers copy out of the
//! map with `read_all` and drop the reader.

pub mod error;

use crate::config::IoConfig;
use crate::io::error::{IoError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// A read-only, size-limited view of a file on disk.
pub struct SafeReader {
    path: PathBuf,
    // None when the file size is zero; memmap cannot map empty files.
    mmap: Option<Mmap>,
    file_size: u64,
}

impl SafeReader {
    /// Opens and maps a file. Fails if it is larger than `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IoConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limit = limits.max_file_size,
            "Opening image"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        let mmap = if file_size == 0 {
            None
        } else {
            // Safety: read-only map of a regular file; the map is only read through
            // slices that do not outlive `self`.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            file_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.file_size
    }

    fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Copy of up to `len` bytes at `offset`; short or empty past end of file.
    pub fn read_at(&self, offset: usize, len: usize) -> Vec<u8> {
        let data = self.as_slice();
        if offset >= data.len() {
            return Vec::new();
        }
        let end = offset.saturating_add(len).min(data.len());
        trace!(path = %self.path.display(), offset, len = end - offset, "Performed read");
        data[offset..end].to_vec()
    }

    /// Copy of the whole file.
    pub fn read_all(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

/// Load a whole image into memory under the configured size limit.
pub fn load_image<P: AsRef<Path>>(path: P, limits: &IoConfig) -> Result<Vec<u8>> {
    let reader = SafeReader::open(path, limits)?;
    Ok(reader.read_all())
}

/// Write `data` to `path`, replacing any existing file.
pub fn write_image<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, data)?;
    debug!(path = %path.display(), size = data.len(), "Wrote image");
    Ok(())
}
