//! PE container parser.
//!
//! Walks the header chain (DOS header, NT signature, COFF header, optional
//! header, section table) without a runtime loader. Each stage is a hard
//! precondition for the next. A section table that runs past the end of the
//! buffer downgrades the result to `ParseStatus::Truncated` instead of failing,
//! since the headers before it are still usable.

pub mod headers;
pub mod sections;
pub mod types;
pub mod utils;

use tracing::debug;

use headers::*;
use sections::*;
pub use types::*;

impl PeImage {
    /// Parse container metadata from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let e_lfanew = parse_dos_header(data)?;
        parse_pe_signature(data, e_lfanew)?;

        let coff_offset = e_lfanew.saturating_add(4);
        let coff = parse_coff_header(data, coff_offset)?;

        let optional_offset = coff_offset + COFF_HEADER_SIZE;
        let optional = parse_optional_header(data, optional_offset)?;

        let section_offset = optional_offset + coff.size_of_optional_header as usize;
        let (sections, truncated) =
            parse_section_headers(data, section_offset, coff.number_of_sections);

        let status = match truncated {
            Some(reason) => ParseStatus::Truncated { reason },
            None => ParseStatus::Complete,
        };

        debug!(
            machine = ?coff.machine,
            bitness = %optional.bitness(),
            sections = sections.len(),
            declared = coff.number_of_sections,
            ?status,
            "Parsed PE container"
        );

        Ok(Self {
            bitness: optional.bitness(),
            machine: coff.machine,
            entry_point: optional.address_of_entry_point,
            image_base: optional.image_base,
            section_alignment: optional.section_alignment,
            file_alignment: optional.file_alignment,
            characteristics: coff.characteristics,
            sections,
            status,
        })
    }

    /// View the parsed sections as a lookup table.
    pub fn section_table(&self) -> SectionTable<'_> {
        SectionTable::new(&self.sections)
    }

    /// Convert RVA to file offset
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.section_table().rva_to_offset(rva)
    }

    /// Convert file offset to RVA
    pub fn offset_to_rva(&self, offset: usize) -> Option<u32> {
        self.section_table().offset_to_rva(offset)
    }

    /// Find the section containing an RVA
    pub fn section_containing_rva(&self, rva: u32) -> Option<&crate::core::section::Section> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// Entry point as a virtual address
    pub fn entry_va(&self) -> u64 {
        self.image_base.wrapping_add(u64::from(self.entry_point))
    }

    pub fn has_executable_section(&self) -> bool {
        self.sections.iter().any(|s| s.is_executable())
    }
}
