//! Shared helpers for integration tests.
//!
//! Images are assembled byte by byte so no sample binaries are needed.

#![allow(dead_code)]

use binpatch::core::disassembler::{Assembler, Bitness, EncodeError};

pub const IMAGE_BASE_64: u64 = 0x1_4000_0000;
pub const IMAGE_BASE_32: u64 = 0x40_0000;
/// RVA of the first section added to a builder
pub const CODE_RVA: u32 = 0x1000;
/// File offset of the first section's raw data
pub const CODE_OFFSET: usize = 0x200;

pub const EXEC: u32 = 0x6000_0020; // code | execute | read
pub const DATA: u32 = 0xC000_0040; // initialized data | read | write
pub const RDATA: u32 = 0x4000_0040;

/// `mov eax, 1; ret`
pub const MOV_RET: [u8; 6] = [0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3];

struct SectionDef {
    name: [u8; 8],
    rva: u32,
    data: Vec<u8>,
    characteristics: u32,
}

/// Builds a minimal PE32 or PE32+ image.
///
/// Section raw sizes equal the data length exactly, so decoding never runs
/// into alignment padding.
pub struct PeBuilder {
    bitness: Bitness,
    image_base: u64,
    entry_rva: u32,
    sections: Vec<SectionDef>,
}

impl PeBuilder {
    pub fn new(bitness: Bitness) -> Self {
        let image_base = match bitness {
            Bitness::Bits64 => IMAGE_BASE_64,
            Bitness::Bits32 => IMAGE_BASE_32,
        };
        Self {
            bitness,
            image_base,
            entry_rva: CODE_RVA,
            sections: Vec::new(),
        }
    }

    pub fn image_base(mut self, base: u64) -> Self {
        self.image_base = base;
        self
    }

    /// Add a section at the next 0x1000-aligned RVA.
    pub fn section(mut self, name: &str, data: &[u8], characteristics: u32) -> Self {
        let rva = self
            .sections
            .last()
            .map(|s| align(s.rva + (s.data.len() as u32).max(1), 0x1000))
            .unwrap_or(CODE_RVA);
        let mut raw = [0u8; 8];
        for (dst, src) in raw.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        self.sections.push(SectionDef {
            name: raw,
            rva,
            data: data.to_vec(),
            characteristics,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let (magic, opt_size, machine): (u16, u16, u16) = match self.bitness {
            Bitness::Bits64 => (0x20B, 0xF0, 0x8664),
            Bitness::Bits32 => (0x10B, 0xE0, 0x014C),
        };
        let coff = 0x44usize;
        let opt = coff + 20;
        let table = opt + opt_size as usize;

        let mut raw_offsets = Vec::new();
        let mut next = CODE_OFFSET;
        for s in &self.sections {
            raw_offsets.push(next);
            next = align((next + s.data.len()) as u32, 0x200) as usize;
            next = next.max(raw_offsets[raw_offsets.len() - 1] + 0x200);
        }
        let mut out = vec![0u8; next.max(CODE_OFFSET)];

        out[0..2].copy_from_slice(b"MZ");
        put32(&mut out, 0x3C, 0x40);
        out[0x40..0x44].copy_from_slice(b"PE\0\0");

        put16(&mut out, coff, machine);
        put16(&mut out, coff + 2, self.sections.len() as u16);
        put16(&mut out, coff + 16, opt_size);
        put16(&mut out, coff + 18, 0x0022);

        put16(&mut out, opt, magic);
        put32(&mut out, opt + 16, self.entry_rva);
        match self.bitness {
            Bitness::Bits64 => out[opt + 24..opt + 32].copy_from_slice(&self.image_base.to_le_bytes()),
            Bitness::Bits32 => put32(&mut out, opt + 28, self.image_base as u32),
        }
        put32(&mut out, opt + 32, 0x1000);
        put32(&mut out, opt + 36, 0x200);

        for (i, s) in self.sections.iter().enumerate() {
            let rec = table + i * 40;
            out[rec..rec + 8].copy_from_slice(&s.name);
            put32(&mut out, rec + 8, s.data.len() as u32);
            put32(&mut out, rec + 12, s.rva);
            put32(&mut out, rec + 16, s.data.len() as u32);
            put32(&mut out, rec + 20, raw_offsets[i] as u32);
            put32(&mut out, rec + 36, s.characteristics);
            out[raw_offsets[i]..raw_offsets[i] + s.data.len()].copy_from_slice(&s.data);
        }
        out
    }
}

fn align(v: u32, a: u32) -> u32 {
    v.div_ceil(a) * a
}

fn put16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// 64-bit image with a single executable `.text` section holding `code`.
pub fn pe64_with_code(code: &[u8]) -> Vec<u8> {
    PeBuilder::new(Bitness::Bits64)
        .section(".text", code, EXEC)
        .build()
}

/// 32-bit image with a single executable `.text` section holding `code`.
pub fn pe32_with_code(code: &[u8]) -> Vec<u8> {
    PeBuilder::new(Bitness::Bits32)
        .section(".text", code, EXEC)
        .build()
}

/// Encoder that knows a handful of fixed instructions.
pub struct TableAssembler;

impl Assembler for TableAssembler {
    fn assemble(&self, text: &str, _bitness: Bitness, _origin: u64) -> Result<Vec<u8>, EncodeError> {
        match text.trim() {
            "nop" => Ok(vec![0x90]),
            "ret" => Ok(vec![0xC3]),
            "int3" => Ok(vec![0xCC]),
            "xor eax, eax" => Ok(vec![0x31, 0xC0]),
            other => Err(EncodeError {
                text: other.to_string(),
                reason: "unknown instruction".to_string(),
            }),
        }
    }
}
