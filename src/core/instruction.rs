//! Instruction and Operand types for decoded x86 instructions.
//!
//! `Instruction` is a self-contained record: the decoder's native instruction
//! type never leaves the backend that produced it. Everything downstream
//! (index, cross-references, search) works on these fields alone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control-flow classification of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlowClass {
    /// Falls through to the next instruction
    #[default]
    None,
    /// Call, direct or indirect
    Call,
    /// Unconditional jump, direct or indirect
    Jump,
    /// Conditional jump
    ConditionalJump,
    /// Return
    Return,
}

impl FlowClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowClass::None => "none",
            FlowClass::Call => "call",
            FlowClass::Jump => "jump",
            FlowClass::ConditionalJump => "cond_jump",
            FlowClass::Return => "return",
        }
    }
}

impl fmt::Display for FlowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of operands that can appear in instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    /// Register operand
    Register,
    /// Immediate value operand
    Immediate,
    /// Memory reference operand
    Memory,
    /// Directly encoded near-branch target
    NearBranch,
    /// Anything the IR does not model (far pointers, implicit operands)
    Other,
}

/// Access types for operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    /// Read access
    Read,
    /// Write access
    Write,
    /// Read and write access
    ReadWrite,
    /// Address computed but not dereferenced (e.g. `lea`)
    None,
}

impl Access {
    pub fn is_write(&self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Structured operand descriptor filled in once at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub kind: OperandKind,
    pub access: Access,
    /// Size in bits, 0 when unknown
    pub size: u16,
    /// Register name (for Register operands)
    pub register: Option<String>,
    /// Immediate value, zero-extended to 64 bits from `size`
    pub immediate: Option<u64>,
    /// Memory base register (for Memory operands)
    pub base: Option<String>,
    /// Memory index register (for Memory operands)
    pub index: Option<String>,
    /// Memory scale factor (for Memory operands)
    pub scale: Option<u8>,
    /// Signed displacement; for RIP-relative operands it is relative to the next instruction
    pub displacement: Option<i64>,
    /// Memory operand addressed relative to the instruction pointer
    pub rip_relative: bool,
    /// Absolute target of a near branch
    pub branch_target: Option<u64>,
}

impl Operand {
    fn empty(kind: OperandKind, access: Access) -> Self {
        Self {
            kind,
            access,
            size: 0,
            register: None,
            immediate: None,
            base: None,
            index: None,
            scale: None,
            displacement: None,
            rip_relative: false,
            branch_target: None,
        }
    }

    /// Create a new register operand
    pub fn register(name: impl Into<String>, access: Access) -> Self {
        Self {
            register: Some(name.into()),
            ..Self::empty(OperandKind::Register, access)
        }
    }

    /// Create a new immediate operand
    pub fn immediate(value: u64, size: u16) -> Self {
        Self {
            size,
            immediate: Some(value),
            ..Self::empty(OperandKind::Immediate, Access::Read)
        }
    }

    /// Create a new memory operand
    pub fn memory(
        access: Access,
        base: Option<String>,
        index: Option<String>,
        scale: Option<u8>,
        displacement: i64,
        rip_relative: bool,
    ) -> Self {
        Self {
            base,
            index,
            scale,
            displacement: Some(displacement),
            rip_relative,
            ..Self::empty(OperandKind::Memory, access)
        }
    }

    /// Create a near-branch operand with an absolute target
    pub fn near_branch(target: u64) -> Self {
        Self {
            branch_target: Some(target),
            ..Self::empty(OperandKind::NearBranch, Access::Read)
        }
    }

    pub fn other() -> Self {
        Self::empty(OperandKind::Other, Access::Read)
    }

    pub fn is_memory(&self) -> bool {
        self.kind == OperandKind::Memory
    }

    /// Effective address of a RIP-relative memory operand.
    pub fn rip_target(&self, next_address: u64) -> Option<u64> {
        if !self.rip_relative {
            return None;
        }
        self.displacement
            .map(|disp| next_address.wrapping_add(disp as u64))
    }
}

/// Output of the decode capability for one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Encoded length in bytes, never zero
    pub length: usize,
    pub mnemonic: String,
    pub op_str: String,
    pub flow: FlowClass,
    pub is_nop: bool,
    pub operands: Vec<Operand>,
}

/// Analysis-extension fields. These are the only part of an instruction that
/// may change after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstructionMetadata {
    /// Start address of the owning function
    pub function_address: Option<u64>,
    pub symbol: Option<String>,
    pub comment: Option<String>,
    /// Resolved RIP-relative target
    pub rip_target: Option<u64>,
    /// Operand-type label (e.g. "ptr", "string", "imm")
    pub operand_type: Option<String>,
}

/// A decoded instruction placed in the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Virtual address
    pub address: u64,
    /// Position of the first byte in the file
    pub file_offset: usize,
    /// Index of the owning section in the section table
    pub section_index: usize,
    pub length: usize,
    /// Copy of the encoded bytes, taken at build time
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub op_str: String,
    pub flow: FlowClass,
    pub is_nop: bool,
    pub operands: Vec<Operand>,
    pub metadata: InstructionMetadata,
}

impl Instruction {
    /// Materialise an instruction from a decode result and the bytes it consumed.
    pub fn from_decoded(
        address: u64,
        file_offset: usize,
        section_index: usize,
        bytes: &[u8],
        decoded: DecodedInstruction,
    ) -> Self {
        let mut ins = Self {
            address,
            file_offset,
            section_index,
            length: bytes.len(),
            bytes: bytes.to_vec(),
            mnemonic: decoded.mnemonic,
            op_str: decoded.op_str,
            flow: decoded.flow,
            is_nop: decoded.is_nop,
            operands: decoded.operands,
            metadata: InstructionMetadata::default(),
        };
        ins.metadata.rip_target = ins.rip_relative_target();
        ins
    }

    /// Address one past the last byte
    pub fn end_address(&self) -> u64 {
        self.address.wrapping_add(self.length as u64)
    }

    pub fn contains_address(&self, address: u64) -> bool {
        address >= self.address && address < self.end_address()
    }

    pub fn contains_offset(&self, offset: usize) -> bool {
        offset >= self.file_offset && offset < self.file_offset + self.length
    }

    pub fn is_call(&self) -> bool {
        self.flow == FlowClass::Call
    }

    pub fn is_jump(&self) -> bool {
        self.flow == FlowClass::Jump
    }

    pub fn is_conditional_jump(&self) -> bool {
        self.flow == FlowClass::ConditionalJump
    }

    pub fn is_return(&self) -> bool {
        self.flow == FlowClass::Return
    }

    /// Call, jump or conditional jump
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow,
            FlowClass::Call | FlowClass::Jump | FlowClass::ConditionalJump
        )
    }

    /// Target of a directly encoded near branch, if any
    pub fn near_branch_target(&self) -> Option<u64> {
        self.operands
            .iter()
            .find(|op| op.kind == OperandKind::NearBranch)
            .and_then(|op| op.branch_target)
    }

    /// First RIP-relative memory operand
    pub fn rip_relative_operand(&self) -> Option<&Operand> {
        self.operands.iter().find(|op| op.is_memory() && op.rip_relative)
    }

    /// Effective address of the first RIP-relative memory operand
    pub fn rip_relative_target(&self) -> Option<u64> {
        self.rip_relative_operand()
            .and_then(|op| op.rip_target(self.end_address()))
    }

    /// Intel-syntax text, e.g. `mov eax, 1`
    pub fn text(&self) -> String {
        if self.op_str.is_empty() {
            self.mnemonic.clone()
        } else {
            format!("{} {}", self.mnemonic, self.op_str)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.text())
    }
}
