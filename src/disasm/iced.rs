use iced_x86::{
    Decoder, DecoderError, DecoderOptions, FlowControl, Formatter, InstructionInfoFactory,
    IntelFormatter, Mnemonic, OpAccess, OpKind, Register as IReg,
};

use crate::core::disassembler::{Bitness, Disassembler, DisassemblerError, DisassemblerResult};
use crate::core::instruction::{Access, DecodedInstruction, FlowClass, Operand};

/// x86/x64 decoder backed by iced-x86. Stateless; the mode comes with each call.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcedDisassembler;

impl IcedDisassembler {
    pub fn new() -> Self {
        Self
    }

    fn reg_name(reg: IReg) -> Option<String> {
        if reg == IReg::None {
            None
        } else {
            Some(format!("{:?}", reg).to_ascii_lowercase())
        }
    }

    fn access(access: OpAccess) -> Access {
        match access {
            OpAccess::Read | OpAccess::CondRead => Access::Read,
            OpAccess::Write | OpAccess::CondWrite => Access::Write,
            OpAccess::ReadWrite | OpAccess::ReadCondWrite => Access::ReadWrite,
            _ => Access::None,
        }
    }

    fn flow(instr: &iced_x86::Instruction) -> FlowClass {
        match instr.flow_control() {
            FlowControl::Call | FlowControl::IndirectCall => FlowClass::Call,
            FlowControl::UnconditionalBranch | FlowControl::IndirectBranch => FlowClass::Jump,
            FlowControl::ConditionalBranch => FlowClass::ConditionalJump,
            FlowControl::Return => FlowClass::Return,
            _ => FlowClass::None,
        }
    }

    fn iced_operands(instr: &iced_x86::Instruction) -> Vec<Operand> {
        let mut factory = InstructionInfoFactory::new();
        let info = factory.info(instr);
        let mut out = Vec::with_capacity(instr.op_count() as usize);

        for i in 0..instr.op_count() {
            let access = Self::access(info.op_access(i));
            let op = match instr.op_kind(i) {
                OpKind::Register => Operand::register(
                    Self::reg_name(instr.op_register(i)).unwrap_or_default(),
                    access,
                ),
                OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => {
                    Operand::near_branch(instr.near_branch_target())
                }
                OpKind::Immediate8 | OpKind::Immediate8_2nd => {
                    Operand::immediate(instr.immediate(i) & 0xFF, 8)
                }
                OpKind::Immediate16 | OpKind::Immediate8to16 => {
                    Operand::immediate(instr.immediate(i) & 0xFFFF, 16)
                }
                OpKind::Immediate32 | OpKind::Immediate8to32 => {
                    Operand::immediate(instr.immediate(i) & 0xFFFF_FFFF, 32)
                }
                OpKind::Immediate64 | OpKind::Immediate8to64 | OpKind::Immediate32to64 => {
                    Operand::immediate(instr.immediate(i), 64)
                }
                OpKind::Memory => {
                    let rip_relative = instr.is_ip_rel_memory_operand();
                    // iced folds the next IP into the displacement of IP-relative
                    // operands; store it relative to the next instruction instead.
                    let displacement = if rip_relative {
                        instr.ip_rel_memory_address().wrapping_sub(instr.next_ip()) as i64
                    } else {
                        instr.memory_displacement64() as i64
                    };
                    let scale = instr.memory_index_scale();
                    Operand::memory(
                        access,
                        Self::reg_name(instr.memory_base()),
                        Self::reg_name(instr.memory_index()),
                        if scale > 1 { Some(scale as u8) } else { None },
                        displacement,
                        rip_relative,
                    )
                }
                _ => Operand::other(),
            };
            out.push(op);
        }
        out
    }
}

impl Disassembler for IcedDisassembler {
    fn decode(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> DisassemblerResult<DecodedInstruction> {
        if bytes.is_empty() {
            return Err(DisassemblerError::InsufficientBytes);
        }
        let mut decoder = Decoder::with_ip(bitness.bits(), bytes, address, DecoderOptions::NONE);
        let instr = decoder.decode();
        if instr.is_invalid() {
            return Err(match decoder.last_error() {
                DecoderError::NoMoreBytes => DisassemblerError::InsufficientBytes,
                _ => DisassemblerError::InvalidInstruction,
            });
        }

        let mut fmt = IntelFormatter::new();
        fmt.options_mut().set_space_after_operand_separator(true);
        let mut mnemonic = String::new();
        fmt.format_mnemonic(&instr, &mut mnemonic);
        let mut op_str = String::new();
        fmt.format_all_operands(&instr, &mut op_str);

        Ok(DecodedInstruction {
            length: instr.len(),
            mnemonic,
            op_str,
            flow: Self::flow(&instr),
            is_nop: instr.mnemonic() == Mnemonic::Nop,
            operands: Self::iced_operands(&instr),
        })
    }

    fn max_instruction_length(&self) -> usize {
        15
    }

    fn name(&self) -> &str {
        "iced-x86"
    }
}
