//! Mutable image bytes with an immutable original snapshot.
//!
//! `ByteBuffer` keeps three parallel arrays of equal length: the current
//! bytes, the bytes as loaded, and a write mask. The mask records write
//! intent only. Every "modified" query compares content against the
//! original, so writing a byte back to its original value reports no
//! modification even though its mask bit stays set.

use sha2::{Digest, Sha256};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::config::IoConfig;
use crate::error::{BinpatchError, Result};

/// A byte whose current value differs from the loaded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifiedByte {
    pub offset: usize,
    pub original: u8,
    pub current: u8,
}

#[derive(Debug, Clone)]
pub struct ByteBuffer {
    current: Vec<u8>,
    original: Vec<u8>,
    mask: Vec<bool>,
    path: Option<PathBuf>,
}

impl ByteBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            original: data.clone(),
            current: data,
            mask: vec![false; len],
            path: None,
        }
    }

    pub fn with_path(data: Vec<u8>, path: impl Into<PathBuf>) -> Self {
        let mut buffer = Self::new(data);
        buffer.path = Some(path.into());
        buffer
    }

    /// Load a file under the configured size limit.
    pub fn from_file<P: AsRef<Path>>(path: P, limits: &IoConfig) -> Result<Self> {
        let path = path.as_ref();
        let data = crate::io::load_image(path, limits)?;
        debug!(path = %path.display(), size = data.len(), "Loaded byte buffer");
        Ok(Self::with_path(data, path))
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Current bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.current
    }

    /// Bytes as loaded.
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Associated file path. Metadata only; nothing is read from it after load.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bounded read of current bytes.
    pub fn read(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.current.get(offset..end)
    }

    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.current.get(offset).copied()
    }

    /// Write one byte. Out-of-range offsets are ignored.
    pub fn write_byte(&mut self, offset: usize, value: u8) {
        if offset >= self.current.len() {
            trace!(offset, len = self.current.len(), "Ignored out-of-range byte write");
            return;
        }
        self.current[offset] = value;
        self.mask[offset] = true;
    }

    /// Write a run of bytes. Ignored unless the whole run fits.
    pub fn write_bytes(&mut self, offset: usize, values: &[u8]) {
        let Some(range) = self.range_of(offset, values.len()) else {
            trace!(offset, count = values.len(), "Ignored out-of-range write");
            return;
        };
        self.current[range.clone()].copy_from_slice(values);
        self.mask[range].fill(true);
    }

    fn range_of(&self, offset: usize, len: usize) -> Option<Range<usize>> {
        let end = offset.checked_add(len)?;
        (len > 0 && end <= self.current.len()).then_some(offset..end)
    }

    /// Validate `offset..offset+values.len()`, capture the bytes about to be
    /// overwritten, then write. Nothing changes when validation fails.
    pub fn checked_write(&mut self, offset: usize, values: &[u8]) -> Result<Vec<u8>> {
        if values.is_empty() {
            return Err(BinpatchError::InvalidInput("patch bytes are empty".into()));
        }
        let range = self.range_of(offset, values.len()).ok_or(BinpatchError::Bounds {
            offset,
            len: values.len(),
            limit: self.current.len(),
        })?;
        let captured = self.current[range.clone()].to_vec();
        self.current[range.clone()].copy_from_slice(values);
        self.mask[range].fill(true);
        Ok(captured)
    }

    /// Restore every byte from the snapshot and clear the write mask.
    pub fn revert_to_original(&mut self) {
        self.current.copy_from_slice(&self.original);
        self.mask.fill(false);
        debug!(len = self.current.len(), "Reverted buffer to original");
    }

    /// Clear write-intent marks without touching content.
    pub fn clear_write_mask(&mut self) {
        self.mask.fill(false);
    }

    pub fn is_written(&self, offset: usize) -> bool {
        self.mask.get(offset).copied().unwrap_or(false)
    }

    pub fn is_modified(&self, offset: usize) -> bool {
        offset < self.current.len() && self.current[offset] != self.original[offset]
    }

    pub fn is_dirty(&self) -> bool {
        self.current != self.original
    }

    pub fn modified_bytes(&self) -> Vec<ModifiedByte> {
        self.current
            .iter()
            .zip(&self.original)
            .enumerate()
            .filter(|(_, (c, o))| c != o)
            .map(|(offset, (&current, &original))| ModifiedByte {
                offset,
                original,
                current,
            })
            .collect()
    }

    /// Maximal runs of bytes whose content differs from the original.
    pub fn modified_ranges(&self) -> Vec<Range<usize>> {
        runs((0..self.current.len()).map(|i| self.current[i] != self.original[i]))
    }

    /// Maximal runs of set write-mask bits, regardless of content.
    pub fn write_mask_ranges(&self) -> Vec<Range<usize>> {
        runs(self.mask.iter().copied())
    }

    /// SHA-256 of the current bytes, lowercase hex.
    pub fn digest(&self) -> String {
        sha256_hex(&self.current)
    }

    pub fn original_digest(&self) -> String {
        sha256_hex(&self.original)
    }

    /// Write the current bytes to `path`.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::io::write_image(path, &self.current)?;
        Ok(())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn runs<I: Iterator<Item = bool>>(flags: I) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = None;
    let mut len = 0;
    for (i, set) in flags.enumerate() {
        match (set, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push(s..i);
                start = None;
            }
            _ => {}
        }
        len = i + 1;
    }
    if let Some(s) = start {
        out.push(s..len);
    }
    out
}
