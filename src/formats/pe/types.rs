//! Core PE data types and structures

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::disassembler::Bitness;
use crate::core::section::Section;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const PE_SIGNATURE: u32 = 0x0000_4550; // PE\0\0
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

/// Offset of `e_lfanew` inside the DOS header.
pub const E_LFANEW_OFFSET: usize = 0x3C;
/// Bytes of DOS header needed to read `e_lfanew`.
pub const DOS_HEADER_SIZE: usize = 0x40;
pub const COFF_HEADER_SIZE: usize = 20;
pub const SECTION_HEADER_SIZE: usize = 40;

/// Bytes of optional header read by the parser (through `file_alignment`).
pub const OPTIONAL_HEADER_MIN_SIZE: usize = 40;

// Section characteristics
pub const IMAGE_SCN_CNT_CODE: u32 = 0x00000020;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x00000040;
pub const IMAGE_SCN_CNT_UNINITIALIZED_DATA: u32 = 0x00000080;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x20000000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x40000000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x80000000;

/// PE parsing error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeError {
    #[error("Invalid DOS signature")]
    InvalidDosSignature,
    #[error("Invalid PE signature: 0x{0:08x}")]
    InvalidPeSignature(u32),
    #[error("Invalid optional header magic: 0x{0:04x}")]
    InvalidMagic(u16),
    #[error("Truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, PeError>;

/// Machine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Machine {
    Unknown,
    I386,   // 0x014c
    X86_64, // 0x8664
    Arm,    // 0x01c0
    Arm64,  // 0xaa64
    Other(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0x014c => Self::I386,
            0x8664 => Self::X86_64,
            0x01c0 => Self::Arm,
            0xaa64 => Self::Arm64,
            0 => Self::Unknown,
            other => Self::Other(other),
        }
    }
}

/// COFF header (20 bytes)
#[derive(Debug, Clone, Copy)]
pub struct CoffHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

/// The subset of the optional header the parser needs, for either shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalHeader {
    pub magic: u16,
    pub address_of_entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
}

impl OptionalHeader {
    /// Bitness comes from the magic field alone.
    pub fn bitness(&self) -> Bitness {
        if self.magic == PE32PLUS_MAGIC {
            Bitness::Bits64
        } else {
            Bitness::Bits32
        }
    }
}

/// Whether the section table was read in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStatus {
    Complete,
    /// Headers parsed but the section table ran past the end of the buffer.
    Truncated { reason: String },
}

/// Parsed container metadata. Holds no reference to the bytes it came from.
#[derive(Debug, Clone, Serialize)]
pub struct PeImage {
    pub bitness: Bitness,
    pub machine: Machine,
    pub entry_point: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub characteristics: u16,
    pub sections: Vec<Section>,
    pub status: ParseStatus,
}

impl PeImage {
    /// Headers always parsed if a `PeImage` exists.
    pub fn is_valid(&self) -> bool {
        true
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.status, ParseStatus::Truncated { .. })
    }

    pub fn is_64bit(&self) -> bool {
        self.bitness == Bitness::Bits64
    }
}
