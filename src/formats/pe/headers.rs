//! PE header parsing

use tracing::debug;

use crate::formats::pe::types::*;
use crate::formats::pe::utils::{ensure_len, ReadExt};

/// Check the DOS signature and return `e_lfanew`, the offset of the NT headers.
pub fn parse_dos_header(data: &[u8]) -> Result<usize> {
    match data.read_u16_le_at(0) {
        Some(DOS_SIGNATURE) => {}
        _ => return Err(PeError::InvalidDosSignature),
    }
    ensure_len(data, 0, DOS_HEADER_SIZE)?;

    let e_lfanew = data
        .read_u32_le_at(E_LFANEW_OFFSET)
        .ok_or(PeError::TruncatedHeader {
            expected: DOS_HEADER_SIZE,
            actual: data.len(),
        })?;
    Ok(e_lfanew as usize)
}

/// Check the 4-byte NT signature at `offset`.
pub fn parse_pe_signature(data: &[u8], offset: usize) -> Result<()> {
    ensure_len(data, offset, 4)?;
    let signature = data.read_u32_le_at(offset).unwrap_or_default();
    if signature != PE_SIGNATURE {
        return Err(PeError::InvalidPeSignature(signature));
    }
    Ok(())
}

/// Parse COFF header from data at offset
pub fn parse_coff_header(data: &[u8], offset: usize) -> Result<CoffHeader> {
    ensure_len(data, offset, COFF_HEADER_SIZE)?;
    let u16_at = |rel: usize| data.read_u16_le_at(offset + rel).unwrap_or_default();
    let u32_at = |rel: usize| data.read_u32_le_at(offset + rel).unwrap_or_default();

    Ok(CoffHeader {
        machine: Machine::from(u16_at(0)),
        number_of_sections: u16_at(2),
        time_date_stamp: u32_at(4),
        pointer_to_symbol_table: u32_at(8),
        number_of_symbols: u32_at(12),
        size_of_optional_header: u16_at(16),
        characteristics: u16_at(18),
    })
}

/// Parse the optional header, branching on its magic into the PE32 or PE32+ layout.
pub fn parse_optional_header(data: &[u8], offset: usize) -> Result<OptionalHeader> {
    ensure_len(data, offset, 2)?;
    let magic = data.read_u16_le_at(offset).unwrap_or_default();
    if magic != PE32_MAGIC && magic != PE32PLUS_MAGIC {
        return Err(PeError::InvalidMagic(magic));
    }
    ensure_len(data, offset, OPTIONAL_HEADER_MIN_SIZE)?;

    let u32_at = |rel: usize| data.read_u32_le_at(offset + rel).unwrap_or_default();
    let image_base = match magic {
        PE32_MAGIC => u64::from(u32_at(28)),
        _ => data.read_u64_le_at(offset + 24).unwrap_or_default(),
    };

    let header = OptionalHeader {
        magic,
        address_of_entry_point: u32_at(16),
        image_base,
        section_alignment: u32_at(32),
        file_alignment: u32_at(36),
    };
    debug!(
        magic = format_args!("{:#x}", magic),
        image_base = format_args!("{:#x}", image_base),
        entry = format_args!("{:#x}", header.address_of_entry_point),
        "Parsed optional header"
    );
    Ok(header)
}
