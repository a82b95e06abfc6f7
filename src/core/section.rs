//! Section type for container-level regions.
//!
//! Sections are named, contiguous regions of the image with their own
//! permissions and raw/virtual sizes. They are parsed once and never mutated.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::formats::pe::types::{
    IMAGE_SCN_CNT_CODE, IMAGE_SCN_CNT_INITIALIZED_DATA, IMAGE_SCN_CNT_UNINITIALIZED_DATA,
    IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ, IMAGE_SCN_MEM_WRITE,
};

bitflags! {
    /// Section characteristic flags as stored in the section table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SectionFlags: u32 {
        const CODE = IMAGE_SCN_CNT_CODE;
        const INITIALIZED_DATA = IMAGE_SCN_CNT_INITIALIZED_DATA;
        const UNINITIALIZED_DATA = IMAGE_SCN_CNT_UNINITIALIZED_DATA;
        const EXECUTE = IMAGE_SCN_MEM_EXECUTE;
        const READ = IMAGE_SCN_MEM_READ;
        const WRITE = IMAGE_SCN_MEM_WRITE;
    }
}

/// A section record from the container's section table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Position in the section table
    pub index: usize,
    /// Decoded name; may be empty and need not be unique
    pub name: String,
    /// The 8 raw name bytes
    pub raw_name: [u8; 8],
    /// RVA of the section
    pub virtual_address: u32,
    pub virtual_size: u32,
    /// File offset of the raw data
    pub raw_offset: u32,
    pub raw_size: u32,
    /// All characteristic bits, including ones without a named flag
    pub characteristics: SectionFlags,
}

impl Section {
    pub fn is_executable(&self) -> bool {
        self.characteristics.contains(SectionFlags::EXECUTE)
    }

    pub fn is_readable(&self) -> bool {
        self.characteristics.contains(SectionFlags::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.characteristics.contains(SectionFlags::WRITE)
    }

    /// Mapped extent, the larger of the virtual and raw sizes.
    pub fn mapped_size(&self) -> u32 {
        self.virtual_size.max(self.raw_size)
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && u64::from(rva) < u64::from(self.virtual_address) + u64::from(self.mapped_size())
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        let start = self.raw_offset as usize;
        offset >= start && offset < start.saturating_add(self.raw_size as usize)
    }

    /// Raw byte range clamped to a buffer of `buffer_len` bytes.
    pub fn raw_range(&self, buffer_len: usize) -> Range<usize> {
        let start = (self.raw_offset as usize).min(buffer_len);
        let end = start.saturating_add(self.raw_size as usize).min(buffer_len);
        start..end
    }

    /// Virtual address of the section start once loaded at `image_base`.
    pub fn va(&self, image_base: u64) -> u64 {
        image_base.wrapping_add(u64::from(self.virtual_address))
    }

    /// Compact permission string such as `r-x`.
    pub fn perms(&self) -> String {
        let mut perms = String::with_capacity(3);
        perms.push(if self.is_readable() { 'r' } else { '-' });
        perms.push(if self.is_writable() { 'w' } else { '-' });
        perms.push(if self.is_executable() { 'x' } else { '-' });
        perms
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Section '{}' rva={:#x} vsize={:#x} raw={:#x}+{:#x} [{}]",
            self.name,
            self.virtual_address,
            self.virtual_size,
            self.raw_offset,
            self.raw_size,
            self.perms()
        )
    }
}
