use serde::{Deserialize, Serialize};

use crate::core::disassembler::{Bitness, Disassembler, DisassemblerError, DisassemblerResult};
use crate::core::instruction::DecodedInstruction;

pub enum Backend {
    Iced(super::iced::IcedDisassembler),
    Cap(super::capstone::CapstoneDisassembler),
}

impl Disassembler for Backend {
    fn decode(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> DisassemblerResult<DecodedInstruction> {
        match self {
            Backend::Iced(d) => d.decode(bytes, address, bitness),
            Backend::Cap(d) => d.decode(bytes, address, bitness),
        }
    }

    fn max_instruction_length(&self) -> usize {
        match self {
            Backend::Iced(d) => d.max_instruction_length(),
            Backend::Cap(d) => d.max_instruction_length(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Backend::Iced(d) => d.name(),
            Backend::Cap(d) => d.name(),
        }
    }
}

/// Preferred backend kind for explicit selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Iced,
    Capstone,
}

/// Build the selected backend. Capstone fails only if its engine cannot be created.
pub fn for_backend(kind: BackendKind) -> Result<Backend, DisassemblerError> {
    match kind {
        BackendKind::Iced => Ok(Backend::Iced(super::iced::IcedDisassembler::new())),
        BackendKind::Capstone => super::capstone::CapstoneDisassembler::new()
            .map(Backend::Cap)
            .ok_or(DisassemblerError::UnsupportedArchitecture),
    }
}
