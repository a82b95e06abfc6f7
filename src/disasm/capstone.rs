use capstone::arch::x86::X86OperandType;
use capstone::prelude::*;
use capstone::{Arch, Capstone, Mode, NO_EXTRA_MODE};

use crate::core::disassembler::{Bitness, Disassembler, DisassemblerError, DisassemblerResult};
use crate::core::instruction::{Access, DecodedInstruction, FlowClass, Operand};

/// x86/x64 decoder backed by capstone, with one engine handle per mode.
pub struct CapstoneDisassembler {
    cs32: Capstone,
    cs64: Capstone,
}

fn x86_engine(mode: Mode) -> Option<Capstone> {
    let mut cs = Capstone::new_raw(Arch::X86, mode, NO_EXTRA_MODE, None).ok()?;
    // Details are needed for groups (flow class) and structured operands
    cs.set_detail(true).ok()?;
    Some(cs)
}

impl CapstoneDisassembler {
    pub fn new() -> Option<Self> {
        Some(Self {
            cs32: x86_engine(Mode::Mode32)?,
            cs64: x86_engine(Mode::Mode64)?,
        })
    }

    fn engine(&self, bitness: Bitness) -> &Capstone {
        match bitness {
            Bitness::Bits32 => &self.cs32,
            Bitness::Bits64 => &self.cs64,
        }
    }

    /// Mnemonic without `bnd`/`notrack`/`rep` style prefixes, e.g. `jmp` for `bnd jmp`.
    fn base_mnemonic(mnemonic: &str) -> &str {
        mnemonic.rsplit(' ').next().unwrap_or(mnemonic)
    }

    fn is_far(base: &str) -> bool {
        base == "ljmp" || base == "lcall"
    }

    fn flow(groups: &[String], base: &str) -> FlowClass {
        if groups.iter().any(|g| g == "ret" || g == "iret") {
            FlowClass::Return
        } else if groups.iter().any(|g| g == "call") {
            FlowClass::Call
        } else if groups.iter().any(|g| g == "jump") {
            if base == "jmp" || base == "ljmp" {
                FlowClass::Jump
            } else {
                FlowClass::ConditionalJump
            }
        } else {
            FlowClass::None
        }
    }

    /// Capstone's operand access bits are not relied on; the destination of a
    /// `mov`-family instruction is treated as written, everything else as read.
    fn access(mnemonic: &str, index: usize, count: usize) -> Access {
        if mnemonic == "lea" {
            Access::None
        } else if index == 0 && count > 1 && mnemonic.starts_with("mov") {
            Access::Write
        } else if index == 0 && count > 1 {
            Access::ReadWrite
        } else {
            Access::Read
        }
    }
}

impl Disassembler for CapstoneDisassembler {
    fn decode(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> DisassemblerResult<DecodedInstruction> {
        if bytes.is_empty() {
            return Err(DisassemblerError::InsufficientBytes);
        }
        let cs = self.engine(bitness);
        let insns = cs
            .disasm_count(bytes, address, 1)
            .map_err(|_| DisassemblerError::InvalidInstruction)?;
        let insn = insns
            .iter()
            .next()
            .ok_or(DisassemblerError::InvalidInstruction)?;

        let length = insn.bytes().len();
        let mnemonic = insn.mnemonic().unwrap_or("").to_string();
        let op_str = insn.op_str().unwrap_or("").to_string();

        let detail = cs
            .insn_detail(insn)
            .map_err(|e| DisassemblerError::Internal(e.to_string()))?;
        let groups: Vec<String> = detail
            .groups()
            .iter()
            .filter_map(|g| cs.group_name(*g))
            .collect();
        let stem = Self::base_mnemonic(&mnemonic);
        let flow = Self::flow(&groups, stem);
        let far = Self::is_far(stem);

        let mut operands = Vec::new();
        if let Some(x86) = detail.arch_detail().x86() {
            let ops: Vec<_> = x86.operands().collect();
            let count = ops.len();
            // Only a lone immediate on a near call/jump is a branch target
            let direct_branch =
                matches!(flow, FlowClass::Call | FlowClass::Jump | FlowClass::ConditionalJump)
                    && count == 1
                    && !far;
            for (i, op) in ops.into_iter().enumerate() {
                let access = Self::access(&mnemonic, i, count);
                let operand = match op.op_type {
                    X86OperandType::Reg(r) => {
                        Operand::register(cs.reg_name(r).unwrap_or_default(), access)
                    }
                    X86OperandType::Imm(v) if direct_branch => Operand::near_branch(v as u64),
                    X86OperandType::Imm(_) if far => Operand::other(),
                    X86OperandType::Imm(v) => {
                        let size = u16::from(op.size) * 8;
                        let value = if size == 0 || size >= 64 {
                            v as u64
                        } else {
                            (v as u64) & ((1u64 << size) - 1)
                        };
                        Operand::immediate(value, size)
                    }
                    X86OperandType::Mem(m) => {
                        let base = if m.base().0 != 0 { cs.reg_name(m.base()) } else { None };
                        let index = if m.index().0 != 0 { cs.reg_name(m.index()) } else { None };
                        let rip_relative = base.as_deref() == Some("rip");
                        let scale = if m.scale() > 1 { Some(m.scale() as u8) } else { None };
                        Operand::memory(access, base, index, scale, m.disp(), rip_relative)
                    }
                    _ => Operand::other(),
                };
                operands.push(operand);
            }
        }

        Ok(DecodedInstruction {
            length,
            is_nop: mnemonic == "nop",
            mnemonic,
            op_str,
            flow,
            operands,
        })
    }

    fn max_instruction_length(&self) -> usize {
        15
    }

    fn name(&self) -> &str {
        "capstone"
    }
}
