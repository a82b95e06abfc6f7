//! Decode and encode capability traits.
//!
//! The core never decodes or assembles machine code itself. It consumes a
//! `Disassembler` (one instruction per call) and, for patch authoring, an
//! `Assembler`. Concrete backends live in `crate::disasm`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::instruction::DecodedInstruction;

/// Errors that can occur during disassembly operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisassemblerError {
    /// Invalid instruction bytes
    #[error("InvalidInstruction")]
    InvalidInstruction,
    /// Insufficient bytes for complete instruction
    #[error("InsufficientBytes")]
    InsufficientBytes,
    /// Unsupported mode for the selected backend
    #[error("UnsupportedArchitecture")]
    UnsupportedArchitecture,
    /// Internal disassembler error with message
    #[error("InternalError: {0}")]
    Internal(String),
}

/// Result type for disassembly operations
pub type DisassemblerResult<T> = Result<T, DisassemblerError>;

/// Encode capability failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot assemble '{text}': {reason}")]
pub struct EncodeError {
    pub text: String,
    pub reason: String,
}

/// x86 decode mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bitness {
    Bits32,
    Bits64,
}

impl Bitness {
    pub fn bits(&self) -> u32 {
        match self {
            Bitness::Bits32 => 32,
            Bitness::Bits64 => 64,
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Decode capability: one instruction per call.
pub trait Disassembler {
    /// Decode the instruction at the start of `bytes`, located at `address`.
    ///
    /// Unrecognised or truncated encodings are reported as errors, never panics.
    fn decode(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> DisassemblerResult<DecodedInstruction>;

    /// Get the maximum instruction length for this architecture in bytes
    fn max_instruction_length(&self) -> usize {
        15
    }

    /// Get a human-readable name for this disassembler
    fn name(&self) -> &str {
        "Generic Disassembler"
    }
}

impl<D: Disassembler + ?Sized> Disassembler for &D {
    fn decode(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> DisassemblerResult<DecodedInstruction> {
        (**self).decode(bytes, address, bitness)
    }

    fn max_instruction_length(&self) -> usize {
        (**self).max_instruction_length()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Encode capability used by patch-authoring tooling.
pub trait Assembler {
    /// Assemble `text` as if placed at `origin`.
    fn assemble(&self, text: &str, bitness: Bitness, origin: u64) -> Result<Vec<u8>, EncodeError>;
}
