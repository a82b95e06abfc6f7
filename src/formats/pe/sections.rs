//! Section table parsing and RVA translation for PE files

use tracing::warn;

use crate::core::section::{Section, SectionFlags};
use crate::formats::pe::types::*;
use crate::formats::pe::utils::{section_name, ReadExt};

/// Read up to `count` 40-byte section records starting at `offset`.
///
/// Returns the records that fit inside `data` and, when the table runs past
/// the end of the buffer, a description of where it was cut.
pub fn parse_section_headers(
    data: &[u8],
    offset: usize,
    count: u16,
) -> (Vec<Section>, Option<String>) {
    let mut sections = Vec::with_capacity(count as usize);

    for index in 0..count as usize {
        let rec = offset.saturating_add(index * SECTION_HEADER_SIZE);
        let Some(raw) = data.read_slice_at(rec, SECTION_HEADER_SIZE) else {
            let reason = format!(
                "section table entry {} of {} at {:#x} exceeds file size {:#x}",
                index,
                count,
                rec,
                data.len()
            );
            warn!(%reason, "Section table truncated");
            return (sections, Some(reason));
        };

        let mut raw_name = [0u8; 8];
        raw_name.copy_from_slice(&raw[..8]);
        let u32_at = |rel: usize| raw.read_u32_le_at(rel).unwrap_or_default();

        sections.push(Section {
            index,
            name: section_name(&raw_name),
            raw_name,
            virtual_size: u32_at(8),
            virtual_address: u32_at(12),
            raw_size: u32_at(16),
            raw_offset: u32_at(20),
            // 24..36 hold relocation/line-number pointers and counts
            characteristics: SectionFlags::from_bits_retain(u32_at(36)),
        });
    }

    (sections, None)
}

/// Section table in container order.
#[derive(Debug, Clone, Default)]
pub struct SectionTable<'a> {
    sections: &'a [Section],
}

impl<'a> SectionTable<'a> {
    pub fn new(sections: &'a [Section]) -> Self {
        Self { sections }
    }

    /// Get all sections
    pub fn sections(&self) -> &'a [Section] {
        self.sections
    }

    /// Find the first section with the given name
    pub fn section_by_name(&self, name: &str) -> Option<&'a Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Find section containing RVA
    pub fn section_containing_rva(&self, rva: u32) -> Option<&'a Section> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// Convert RVA to file offset. RVAs in the virtual-only tail of a section
    /// (past its raw data) have no file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        let section = self.section_containing_rva(rva)?;
        let delta = rva - section.virtual_address;
        if delta >= section.raw_size {
            return None;
        }
        Some(section.raw_offset as usize + delta as usize)
    }

    /// Convert file offset to RVA; `None` when the result does not fit in 32 bits
    pub fn offset_to_rva(&self, offset: usize) -> Option<u32> {
        let section = self.sections.iter().find(|s| s.contains_offset(offset))?;
        let delta = u32::try_from(offset - section.raw_offset as usize).ok()?;
        section.virtual_address.checked_add(delta)
    }

    /// Executable sections in container order
    pub fn executable_sections(&self) -> impl Iterator<Item = &'a Section> + 'a {
        self.sections.iter().filter(|s| s.is_executable())
    }
}
